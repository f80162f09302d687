pub mod event_store_traits;

pub use event_store_traits::{EventStore, EventStream};
