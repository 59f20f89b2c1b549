//! Typed facade over the Solr admin HTTP API

mod client;
mod types;

pub use client::{ReplicaAddition, SolrApi, SolrClient, SolrError};
pub use types::{ClusterStatus, SolrCollectionState};
