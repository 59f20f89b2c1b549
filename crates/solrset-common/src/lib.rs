//! Common types for the SolrCollectionSet operator: CRD, credentials, events

#![deny(missing_docs)]

pub mod crd;
pub mod credentials;
pub mod events;

pub use credentials::{CredentialError, SolrCredentials};

/// Prefix marking engine-side objects owned by the operator itself.
///
/// Collections, aliases, and configsets whose names begin with this prefix
/// are never created or deleted on behalf of user intent.
pub const RESERVED_PREFIX: &str = "_";

/// Name of the reserved configset backing the checksum collection
pub const CHECKSUMS_CONFIGSET: &str = "_checksums";

/// Namespace holding the Solr basic-auth Secret
pub const SOLR_CREDENTIALS_NAMESPACE: &str = "default";

/// ConfigMap label associating a configset source with a collection set
pub const COLLECTION_SET_LABEL: &str = "collectionSet";

/// ConfigMap label naming the configset a source provides
pub const COLLECTION_LABEL: &str = "collection";

/// ConfigMap data key carrying the base64-encoded configset zip
pub const CONFIGSET_DATA_KEY: &str = "configset";

/// Derive the reserved checksum-collection name for a collection set
pub fn checksums_collection_name(set_name: &str) -> String {
    format!("_{set_name}Checksums")
}

/// Check whether an engine-side name is operator-owned
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Install the rustls crypto provider (aws-lc-rs).
///
/// Must run before the first TLS connection, kube client included.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
