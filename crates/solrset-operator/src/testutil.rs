//! Recording Solr mock shared by the executor and checksum-store tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::solr::{ClusterStatus, ReplicaAddition, SolrApi, SolrCollectionState, SolrError};

/// In-memory `SolrApi` that records every call as a readable string, applies
/// mutations to its own cluster view, and can be programmed to fail specific
/// operations or report backpressure.
///
/// Creation yields a collection with as many replicas as its replication
/// factor, matching an engine with capacity available.
#[derive(Default)]
pub(crate) struct MockSolr {
    cluster: Mutex<ClusterStatus>,
    configsets: Mutex<Vec<String>>,
    docs: Mutex<Vec<serde_json::Map<String, Value>>>,
    calls: Mutex<Vec<String>>,
    failures: Vec<String>,
    backpressure: HashSet<String>,
}

impl MockSolr {
    pub(crate) fn with_collection(
        self,
        name: &str,
        configset: &str,
        replication_factor: i32,
        replica_count: i32,
    ) -> Self {
        self.cluster.lock().unwrap().collections.insert(
            name.to_string(),
            SolrCollectionState {
                name: name.to_string(),
                config_name: configset.to_string(),
                replication_factor,
                replica_count,
            },
        );
        self
    }

    pub(crate) fn with_doc(self, doc: Value) -> Self {
        let object = doc.as_object().expect("doc should be an object").clone();
        self.docs.lock().unwrap().push(object);
        self
    }

    /// Fail every call whose recorded form starts with `prefix`.
    pub(crate) fn with_failure_on(mut self, prefix: &str) -> Self {
        self.failures.push(prefix.to_string());
        self
    }

    /// Report backpressure for add-replicas calls on `collection`.
    pub(crate) fn with_backpressure_on(mut self, collection: &str) -> Self {
        self.backpressure.insert(collection.to_string());
        self
    }

    pub(crate) fn cluster_snapshot(&self) -> ClusterStatus {
        self.cluster.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), SolrError> {
        let failed = self.failures.iter().any(|f| call.starts_with(f.as_str()));
        self.calls.lock().unwrap().push(call.clone());
        if failed {
            return Err(SolrError::Api {
                operation: call,
                status: 400,
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SolrApi for MockSolr {
    async fn get_cluster_status(&self) -> Result<ClusterStatus, SolrError> {
        self.record("get_cluster_status".to_string())?;
        Ok(self.cluster_snapshot())
    }

    async fn list_configsets(&self) -> Result<Vec<String>, SolrError> {
        self.record("list_configsets".to_string())?;
        Ok(self.configsets.lock().unwrap().clone())
    }

    async fn upload_configset(&self, name: &str, _body: &[u8]) -> Result<(), SolrError> {
        self.record(format!("upload_configset {name}"))?;
        let mut configsets = self.configsets.lock().unwrap();
        if !configsets.iter().any(|c| c == name) {
            configsets.push(name.to_string());
        }
        Ok(())
    }

    async fn delete_configset(&self, name: &str) -> Result<(), SolrError> {
        self.record(format!("delete_configset {name}"))?;
        self.configsets.lock().unwrap().retain(|c| c != name);
        Ok(())
    }

    async fn create_collection(
        &self,
        name: &str,
        configset: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError> {
        self.record(format!(
            "create_collection {name} {configset} {replication_factor}"
        ))?;
        self.cluster.lock().unwrap().collections.insert(
            name.to_string(),
            SolrCollectionState {
                name: name.to_string(),
                config_name: configset.to_string(),
                replication_factor,
                replica_count: replication_factor,
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SolrError> {
        self.record(format!("delete_collection {name}"))?;
        self.cluster.lock().unwrap().collections.remove(name);
        Ok(())
    }

    async fn set_replication_factor(
        &self,
        name: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError> {
        self.record(format!("set_replication_factor {name} {replication_factor}"))?;
        if let Some(collection) = self.cluster.lock().unwrap().collections.get_mut(name) {
            collection.replication_factor = replication_factor;
        }
        Ok(())
    }

    async fn add_replicas(&self, name: &str, count: i32) -> Result<ReplicaAddition, SolrError> {
        self.record(format!("add_replicas {name} {count}"))?;
        if self.backpressure.contains(name) {
            return Ok(ReplicaAddition::Backpressure);
        }
        if let Some(collection) = self.cluster.lock().unwrap().collections.get_mut(name) {
            collection.replica_count += count;
        }
        Ok(ReplicaAddition::Added)
    }

    async fn remove_replicas(&self, name: &str, count: i32) -> Result<(), SolrError> {
        self.record(format!("remove_replicas {name} {count}"))?;
        if let Some(collection) = self.cluster.lock().unwrap().collections.get_mut(name) {
            collection.replica_count -= count;
        }
        Ok(())
    }

    async fn assign_alias(&self, alias: &str, collection: &str) -> Result<(), SolrError> {
        self.record(format!("assign_alias {alias} {collection}"))?;
        self.cluster
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_string(), collection.to_string());
        Ok(())
    }

    async fn delete_alias(&self, alias: &str) -> Result<(), SolrError> {
        self.record(format!("delete_alias {alias}"))?;
        self.cluster.lock().unwrap().aliases.remove(alias);
        Ok(())
    }

    async fn reload_collection(&self, name: &str) -> Result<(), SolrError> {
        self.record(format!("reload_collection {name}"))
    }

    async fn query(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>, SolrError> {
        self.record(format!("query {collection} {query}"))?;
        Ok(self.docs.lock().unwrap().clone())
    }

    async fn write_record(&self, collection: &str, record: &Value) -> Result<(), SolrError> {
        let target = record
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or("?");
        let checksum = record
            .get("checksum")
            .and_then(Value::as_str)
            .unwrap_or("?");
        self.record(format!("write_record {collection} {target}={checksum}"))?;

        let object = record.as_object().expect("record should be an object").clone();
        let mut docs = self.docs.lock().unwrap();
        docs.retain(|doc| doc.get("collection").and_then(Value::as_str) != Some(target));
        docs.push(object);
        Ok(())
    }
}
