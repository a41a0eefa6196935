use eventify_core::event::Event;
use eventify_macros::event;

#[event(name = "order.cancelled")]
#[derive(PartialEq)]
enum OrderCancelled {
    ByCustomer { reason: String },
    Expired,
}

#[event(name = "payment.captured")]
struct PaymentCaptured(String, u64);

fn main() {
    assert_eq!(OrderCancelled::EVENT_TYPE, "order.cancelled");
    assert_eq!(PaymentCaptured::EVENT_TYPE, "payment.captured");
    assert_eq!(OrderCancelled::Expired.clone(), OrderCancelled::Expired);
    assert_ne!(
        OrderCancelled::ByCustomer {
            reason: "changed mind".into()
        },
        OrderCancelled::Expired
    );
}
