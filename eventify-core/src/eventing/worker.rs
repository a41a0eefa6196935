use std::future::Future;
use tokio_util::task::TaskTracker;

/// AFTER_* 阶段的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// 每个事务缓冲区一个被追踪的后台任务
    #[default]
    Spawned,
    /// 在完成后回调内直接执行，回调返回前全部完成
    Inline,
}

/// 承载 AFTER_* 释放任务的后台工作者
#[derive(Clone, Default)]
pub struct CompletionWorker {
    tasks: TaskTracker,
}

impl CompletionWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// 等待当前所有任务（含等待期间新产生的任务）完成，之后仍可继续接收任务
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
