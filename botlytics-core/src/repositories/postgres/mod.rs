pub mod events;

pub use events::PostgresEventStore;
