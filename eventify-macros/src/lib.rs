//! eventify 过程宏
//!
//! - `#[event]`：为事件载荷类型实现 `::eventify_core::event::Event`，
//!   并补齐事件所需的派生（`Debug`, `Clone`, `serde::Serialize`, `serde::Deserialize`）。
//!
use proc_macro::TokenStream;

mod event;
mod utils;

/// 事件宏
///
/// 用于具名字段结构体、元组结构体、单元结构体或枚举：
///
/// ```ignore
/// #[event]
/// struct OrderPlaced { order_id: String }
///
/// #[event(name = "order.cancelled")]
/// enum OrderCancelled { ByCustomer { reason: String }, Expired }
/// ```
///
/// - `name`：事件类型键（注册表与 Broker 路由使用），默认为类型名；
/// - 已有的 derive 会与所需派生合并去重，其余属性（如 `#[serde(...)]`）原样保留；
/// - 使用方需直接依赖 `serde`。
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
