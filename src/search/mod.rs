pub mod engine;
pub mod query;
pub mod strategy;

pub use engine::{SearchDocument, SearchEngine, SearchMetadata, SearchResponse};
pub use query::{QueryContext, QueryType, SearchQuery};
pub use strategy::Strategy;
