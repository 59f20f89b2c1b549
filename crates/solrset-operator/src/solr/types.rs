//! Snapshot types for observed Solr cluster state
//!
//! One `ClusterStatus` is taken per reconcile pass and treated as immutable
//! for the rest of the pass.

use std::collections::BTreeMap;

use serde_json::Value;

use super::SolrError;

/// Point-in-time view of the cluster: alias targets and collections
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterStatus {
    /// alias name -> target collection instance
    pub aliases: BTreeMap<String, String>,
    /// instance name -> observed collection state
    pub collections: BTreeMap<String, SolrCollectionState>,
}

/// Observed state of one collection instance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolrCollectionState {
    /// Engine-side name, including any blue/green suffix
    pub name: String,
    /// Configset the collection was created with
    pub config_name: String,
    /// Replication factor the engine reports
    pub replication_factor: i32,
    /// Number of replicas currently present on `shard1`
    pub replica_count: i32,
}

impl ClusterStatus {
    /// Project the CLUSTERSTATUS response body into a snapshot.
    pub fn from_response(body: &Value) -> Result<Self, SolrError> {
        let cluster = body
            .get("cluster")
            .ok_or_else(|| SolrError::Malformed("cluster status has no 'cluster' key".into()))?;

        let mut aliases = BTreeMap::new();
        if let Some(raw) = cluster.get("aliases").and_then(Value::as_object) {
            for (alias, target) in raw {
                if let Some(target) = target.as_str() {
                    aliases.insert(alias.clone(), target.to_string());
                }
            }
        }

        let mut collections = BTreeMap::new();
        if let Some(raw) = cluster.get("collections").and_then(Value::as_object) {
            for (name, detail) in raw {
                collections.insert(
                    name.clone(),
                    SolrCollectionState {
                        name: name.clone(),
                        config_name: detail
                            .get("configName")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        replication_factor: coerce_i32(detail.get("replicationFactor")),
                        replica_count: count_shard1_replicas(detail),
                    },
                );
            }
        }

        Ok(Self {
            aliases,
            collections,
        })
    }
}

/// Normalize Solr's integer-or-string numeric fields to an i32.
///
/// Depending on version the engine serializes `replicationFactor` as either
/// a JSON number or a quoted string. Absence and garbage decode to 0.
pub(crate) fn coerce_i32(value: Option<&Value>) -> i32 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) as i32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Count the replicas of `shard1`. Single-shard collections only.
fn count_shard1_replicas(collection: &Value) -> i32 {
    collection
        .pointer("/shards/shard1/replicas")
        .and_then(Value::as_object)
        .map(|replicas| replicas.len() as i32)
        .unwrap_or(0)
}
