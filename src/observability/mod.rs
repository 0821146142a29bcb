// 进度事件的扇出广播

mod hub;

pub use hub::{ObservabilityHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
