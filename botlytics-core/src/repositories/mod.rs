pub mod memory;
pub mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
