//! Basic-auth client for the Solr admin API
//!
//! All calls are stateless request/response against the collections, configs,
//! update, and select endpoints. Non-2xx responses are elevated to
//! [`SolrError::Api`] carrying the `error.msg` field parsed from the body;
//! transport failures surface as [`SolrError::Transport`].
//!
//! The RPC surface is a trait so the executor and checksum store can run
//! against a recording mock in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use zeroize::Zeroizing;

use solrset_common::SolrCredentials;

use super::types::ClusterStatus;

/// Body phrase the engine returns when the autoscaler has not yet provided
/// nodes for new replicas. Brittle, but it is the only capacity signal the
/// API exposes.
const BACKPRESSURE_SENTINEL: &str = "Not enough eligible nodes";

/// Request timeout for every admin call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the Solr admin API
#[derive(Debug, Error)]
pub enum SolrError {
    /// The engine answered non-2xx; `message` is the parsed `error.msg`
    #[error("{operation} failed with [{status}] [{message}]")]
    Api {
        /// Which call failed, for log context
        operation: String,
        /// HTTP status code
        status: u16,
        /// `error.msg` from the response body, or the raw body
        message: String,
    },

    /// Connection-level failure, propagated from the HTTP client
    #[error("solr request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine answered 2xx but the body doesn't have the expected shape
    #[error("malformed solr response: {0}")]
    Malformed(String),
}

/// Outcome of an add-replicas call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaAddition {
    /// Replicas were added
    Added,
    /// The engine has no capacity yet; scaling is in progress externally
    Backpressure,
}

/// The Solr admin RPC surface used by the reconciler.
#[async_trait]
pub trait SolrApi: Send + Sync {
    /// Read the cluster status: aliases and collections
    async fn get_cluster_status(&self) -> Result<ClusterStatus, SolrError>;

    /// List the configsets present in the engine
    async fn list_configsets(&self) -> Result<Vec<String>, SolrError>;

    /// Upload a zipped configset, overwriting any previous content
    async fn upload_configset(&self, name: &str, body: &[u8]) -> Result<(), SolrError>;

    /// Delete a configset
    async fn delete_configset(&self, name: &str) -> Result<(), SolrError>;

    /// Create a single-shard collection with the given configset
    async fn create_collection(
        &self,
        name: &str,
        configset: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError>;

    /// Delete a collection
    async fn delete_collection(&self, name: &str) -> Result<(), SolrError>;

    /// Set the replication factor of an existing collection
    async fn set_replication_factor(
        &self,
        name: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError>;

    /// Add replicas to `shard1`; reports backpressure instead of erroring
    /// when the engine has no eligible nodes
    async fn add_replicas(&self, name: &str, count: i32) -> Result<ReplicaAddition, SolrError>;

    /// Remove replicas from `shard1`
    async fn remove_replicas(&self, name: &str, count: i32) -> Result<(), SolrError>;

    /// Point an alias at a collection
    async fn assign_alias(&self, alias: &str, collection: &str) -> Result<(), SolrError>;

    /// Delete an alias
    async fn delete_alias(&self, alias: &str) -> Result<(), SolrError>;

    /// Reload a collection
    async fn reload_collection(&self, name: &str) -> Result<(), SolrError>;

    /// Run a query and return the result docs
    async fn query(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>, SolrError>;

    /// Write a single document, committing synchronously
    async fn write_record(&self, collection: &str, record: &Value) -> Result<(), SolrError>;
}

/// Basic-auth `reqwest` client for one Solr cluster.
///
/// Carries only configuration; no state is held between calls.
pub struct SolrClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: Zeroizing<String>,
}

impl SolrClient {
    /// Create a client for the cluster at `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: SolrCredentials) -> Result<Self, SolrError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: credentials.username,
            password: credentials.password,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(self.password.as_str()))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(self.password.as_str()))
    }

    /// Elevate a non-2xx response to a typed error with the parsed
    /// `error.msg`, or hand back the response for body processing.
    async fn check(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, SolrError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SolrError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message: parse_error_message(&body),
        })
    }

    async fn json_body(response: reqwest::Response) -> Result<Value, SolrError> {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SolrError::Malformed(format!("invalid JSON body: {e}")))
    }

    async fn collections_action(
        &self,
        operation: &str,
        params: &[(&str, String)],
    ) -> Result<(), SolrError> {
        let response = self
            .get("/admin/collections")
            .query(params)
            .send()
            .await?;
        Self::check(response, operation).await?;
        Ok(())
    }
}

#[async_trait]
impl SolrApi for SolrClient {
    async fn get_cluster_status(&self) -> Result<ClusterStatus, SolrError> {
        let response = self
            .get("/admin/collections")
            .query(&[("action", "CLUSTERSTATUS")])
            .send()
            .await?;
        let response = Self::check(response, "get cluster status").await?;
        let body = Self::json_body(response).await?;
        ClusterStatus::from_response(&body)
    }

    async fn list_configsets(&self) -> Result<Vec<String>, SolrError> {
        let response = self
            .get("/admin/configs")
            .query(&[("action", "LIST"), ("wt", "json")])
            .send()
            .await?;
        let response = Self::check(response, "list configsets").await?;
        let body = Self::json_body(response).await?;

        let sets = body
            .get("configSets")
            .and_then(Value::as_array)
            .ok_or_else(|| SolrError::Malformed("config list has no 'configSets' key".into()))?;
        Ok(sets
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn upload_configset(&self, name: &str, body: &[u8]) -> Result<(), SolrError> {
        let response = self
            .post("/admin/configs")
            .query(&[
                ("action", "UPLOAD"),
                ("name", name),
                ("overwrite", "true"),
                ("cleanup", "true"),
                ("wt", "json"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body.to_vec())
            .send()
            .await?;
        Self::check(response, &format!("upload configset [{name}]")).await?;
        Ok(())
    }

    async fn delete_configset(&self, name: &str) -> Result<(), SolrError> {
        let response = self
            .get("/admin/configs")
            .query(&[("action", "DELETE"), ("name", name), ("wt", "json")])
            .send()
            .await?;
        Self::check(response, &format!("delete configset [{name}]")).await?;
        Ok(())
    }

    async fn create_collection(
        &self,
        name: &str,
        configset: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError> {
        self.collections_action(
            &format!("create collection [{name}]"),
            &[
                ("action", "CREATE".to_string()),
                ("name", name.to_string()),
                ("collection.configName", configset.to_string()),
                ("numShards", "1".to_string()),
                ("replicationFactor", replication_factor.to_string()),
                ("autoAddReplicas", "true".to_string()),
                ("wt", "json".to_string()),
            ],
        )
        .await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SolrError> {
        self.collections_action(
            &format!("delete collection [{name}]"),
            &[
                ("action", "DELETE".to_string()),
                ("name", name.to_string()),
            ],
        )
        .await
    }

    async fn set_replication_factor(
        &self,
        name: &str,
        replication_factor: i32,
    ) -> Result<(), SolrError> {
        self.collections_action(
            &format!("set replication factor on [{name}]"),
            &[
                ("action", "MODIFYCOLLECTION".to_string()),
                ("collection", name.to_string()),
                ("replicationFactor", replication_factor.to_string()),
                ("wt", "json".to_string()),
            ],
        )
        .await
    }

    async fn add_replicas(&self, name: &str, count: i32) -> Result<ReplicaAddition, SolrError> {
        let count = count.to_string();
        let response = self
            .get("/admin/collections")
            .query(&[
                ("action", "ADDREPLICA"),
                ("collection", name),
                ("shard", "shard1"),
                ("nrtReplicas", count.as_str()),
                ("wt", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(ReplicaAddition::Added);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_error_message(&body);
        if message.contains(BACKPRESSURE_SENTINEL) {
            return Ok(ReplicaAddition::Backpressure);
        }
        Err(SolrError::Api {
            operation: format!("add replicas to [{name}]"),
            status: status.as_u16(),
            message,
        })
    }

    async fn remove_replicas(&self, name: &str, count: i32) -> Result<(), SolrError> {
        self.collections_action(
            &format!("remove replicas from [{name}]"),
            &[
                ("action", "DELETEREPLICA".to_string()),
                ("collection", name.to_string()),
                ("shard", "shard1".to_string()),
                ("count", count.to_string()),
                ("wt", "json".to_string()),
            ],
        )
        .await
    }

    async fn assign_alias(&self, alias: &str, collection: &str) -> Result<(), SolrError> {
        self.collections_action(
            &format!("create alias [{alias}] for [{collection}]"),
            &[
                ("action", "CREATEALIAS".to_string()),
                ("name", alias.to_string()),
                ("collections", collection.to_string()),
            ],
        )
        .await
    }

    async fn delete_alias(&self, alias: &str) -> Result<(), SolrError> {
        self.collections_action(
            &format!("delete alias [{alias}]"),
            &[
                ("action", "DELETEALIAS".to_string()),
                ("name", alias.to_string()),
            ],
        )
        .await
    }

    async fn reload_collection(&self, name: &str) -> Result<(), SolrError> {
        self.collections_action(
            &format!("reload collection [{name}]"),
            &[
                ("action", "RELOAD".to_string()),
                ("name", name.to_string()),
            ],
        )
        .await
    }

    async fn query(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>, SolrError> {
        let response = self
            .get(&format!("/{collection}/select"))
            .query(&[("q.op", "OR"), ("rows", "1000"), ("q", query)])
            .send()
            .await?;
        let response = Self::check(response, &format!("query collection [{collection}]")).await?;
        let body = Self::json_body(response).await?;

        let docs = body
            .pointer("/response/docs")
            .and_then(Value::as_array)
            .ok_or_else(|| SolrError::Malformed("query response has no 'response.docs'".into()))?;
        Ok(docs
            .iter()
            .filter_map(Value::as_object)
            .cloned()
            .collect())
    }

    async fn write_record(&self, collection: &str, record: &Value) -> Result<(), SolrError> {
        let response = self
            .post(&format!("/{collection}/update"))
            .query(&[("commit", "true")])
            .json(&[record])
            .send()
            .await?;
        Self::check(response, &format!("write to collection [{collection}]")).await?;
        Ok(())
    }
}

/// Fish the `error.msg` field out of an error response body, falling back to
/// the raw body when it isn't the standard error shape.
fn parse_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/msg")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
