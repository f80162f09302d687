pub mod aggregate;
pub mod attribution;
pub mod event;
pub mod filter;
pub mod property;

pub use aggregate::{AggregateResult, SessionRollup};
pub use attribution::CampaignAttribution;
pub use event::{Event, KnownEventType, RawEvent, StoredEvent};
pub use filter::{EventFilter, PropertyPredicate, TimeRange};
pub use property::{Properties, PropertyValue};
