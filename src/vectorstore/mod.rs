//! Vector store gateway (C4): a single named collection, hybrid dense+sparse.

mod client;
mod filters;
mod payload;
mod types;

pub use client::VectorStoreClient;
pub use filters::build_search_filter;
pub use payload::{build_payload, point_id_from_chunk_id};
pub use types::{PointInsert, ScoredPoint, SearchFilterArgs, VectorStoreError};
