//! Configset checksum bookkeeping
//!
//! Each collection set gets one reserved collection, `_<setName>Checksums`,
//! inside the managed cluster itself. It stores one document per configset:
//! `{"collection": <configset>, "checksum": <md5 hex>}`, where the checksum
//! covers the base64 blob exactly as read from the source ConfigMap. A drift
//! between a stored checksum and the current source is what triggers a
//! configset re-upload.
//!
//! The backing configset `_checksums` is an embedded asset: the schema files
//! under `configsets/checksums/` are zipped by the build script and streamed
//! to the engine as a single blob.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::info;

use solrset_common::{checksums_collection_name, CHECKSUMS_CONFIGSET};

use crate::solr::{ClusterStatus, SolrApi, SolrError};

/// Zip of the `_checksums` configset, packaged at build time
static CHECKSUMS_CONFIGSET_ZIP: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/checksums-configset.zip"));

/// Lowercase hex MD5 of a configset source blob, as stored in the
/// checksum collection.
pub fn checksum_of(base64_blob: &str) -> String {
    format!("{:x}", md5::compute(base64_blob.as_bytes()))
}

/// Handle on the reserved checksum collection of one collection set.
pub struct ChecksumStore<'a> {
    solr: &'a dyn SolrApi,
    collection: String,
}

impl<'a> ChecksumStore<'a> {
    /// Create a store for the given collection set.
    pub fn new(solr: &'a dyn SolrApi, set_name: &str) -> Self {
        Self {
            solr,
            collection: checksums_collection_name(set_name),
        }
    }

    /// Name of the reserved collection this store manages
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the checksum collection if the cluster doesn't have it yet.
    ///
    /// Returns `Some(fresh_status)` when bootstrap ran (the caller should
    /// adopt the re-read status and report the set as initializing), `None`
    /// when the collection was already present.
    pub async fn ensure_bootstrapped(
        &self,
        cluster: &ClusterStatus,
        replication_factor: i32,
    ) -> Result<Option<ClusterStatus>, SolrError> {
        if cluster.collections.contains_key(&self.collection) {
            return Ok(None);
        }

        info!(collection = %self.collection, "creating checksum collection");
        self.solr
            .upload_configset(CHECKSUMS_CONFIGSET, CHECKSUMS_CONFIGSET_ZIP)
            .await?;
        self.solr
            .create_collection(&self.collection, CHECKSUMS_CONFIGSET, replication_factor)
            .await?;

        // Re-read so the rest of the pass sees the collection it just made.
        let fresh = self.solr.get_cluster_status().await?;
        Ok(Some(fresh))
    }

    /// Read all stored checksums: configset name -> md5 hex.
    pub async fn read_all(&self) -> Result<HashMap<String, String>, SolrError> {
        let docs = self.solr.query(&self.collection, "*:*").await?;
        let mut checksums = HashMap::new();
        for doc in docs {
            let collection = doc.get("collection").and_then(Value::as_str);
            let checksum = doc.get("checksum").and_then(Value::as_str);
            if let (Some(collection), Some(checksum)) = (collection, checksum) {
                checksums.insert(collection.to_string(), checksum.to_string());
            }
        }
        Ok(checksums)
    }

    /// Record the checksum for a configset that was just uploaded.
    pub async fn write(&self, configset: &str, checksum: &str) -> Result<(), SolrError> {
        let record = json!({
            "collection": configset,
            "checksum": checksum,
        });
        self.solr.write_record(&self.collection, &record).await
    }
}
