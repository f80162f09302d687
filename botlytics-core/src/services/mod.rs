pub mod aggregation_engine;
pub mod ingest_service;

pub use aggregation_engine::AggregationEngine;
pub use ingest_service::IngestService;
