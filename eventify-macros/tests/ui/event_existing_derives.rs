use eventify_core::event::{Envelope, Event, PublishContext};
use eventify_macros::event;
use serde::{Deserialize, Serialize};

#[event(name = "stock.reserved")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockReserved {
    sku_code: String,
    quantity: u32,
}

fn main() {
    let event = StockReserved {
        sku_code: "sku-1".into(),
        quantity: 3,
    };
    let envelope = Envelope::new(event.clone(), &PublishContext::default());
    assert_eq!(envelope.event_type(), StockReserved::EVENT_TYPE);
    assert_eq!(envelope.payload::<StockReserved>(), Some(&event));

    let serialized = envelope.to_serialized().unwrap();
    assert_eq!(serialized.payload()["skuCode"], "sku-1");
    assert_eq!(serialized.decode::<StockReserved>().unwrap(), event);
}
