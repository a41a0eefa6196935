use eventify_core::event::Event;
use eventify_macros::event;

#[event]
struct OrderPlaced {
    order_id: String,
    amount: u64,
}

#[event]
struct Heartbeat;

fn main() {
    assert_eq!(OrderPlaced::EVENT_TYPE, "OrderPlaced");
    assert_eq!(Heartbeat::EVENT_TYPE, "Heartbeat");

    let placed = OrderPlaced {
        order_id: "o-1".into(),
        amount: 42,
    };
    let copy = placed.clone();
    assert_eq!(copy.order_id, "o-1");
    assert_eq!(copy.amount, 42);
    let _ = format!("{placed:?}");
}
