//! SolrCollectionSet CRD types
//!
//! Defines the `SolrCollectionSet` CRD: a declarative description of a group
//! of Solr collections (with optional blue/green doubling) that the operator
//! converges the cluster toward.
//!
//! Optional spec fields are defaulted in code via [`SolrCollectionSet::apply_defaults`]
//! and the defaulted spec is persisted, so a stored object always carries the
//! effective configuration.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default for `spec.active`
pub const DEFAULT_ACTIVE: bool = true;

/// Default for `spec.blueGreenEnabled`
pub const DEFAULT_BLUE_GREEN_ENABLED: bool = true;

/// Default for `spec.cleanupEnabled`
pub const DEFAULT_CLEANUP_ENABLED: bool = false;

/// Default for `spec.replicationFactor`
pub const DEFAULT_REPLICATION_FACTOR: i32 = 1;

/// Maximum length of collection, alias, and configset names
pub const MAX_NAME_LENGTH: usize = 100;

// =============================================================================
// SolrCollectionSet CRD
// =============================================================================

/// SolrCollectionSet describes the desired state of a group of Solr
/// collections on one SolrCloud cluster.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "solrset.dev",
    version = "v1alpha1",
    kind = "SolrCollectionSet",
    plural = "solrcollectionsets",
    shortname = "scs",
    namespaced,
    status = "SolrCollectionSetStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".spec.active"}"#,
    printcolumn = r#"{"name":"Scale","type":"string","jsonPath":".status.scaleStatus"}"#,
    printcolumn = r#"{"name":"Cols","type":"string","jsonPath":".status.readyRatio"}"#,
    printcolumn = r#"{"name":"R-Fac","type":"integer","jsonPath":".spec.replicationFactor"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SolrCollectionSetSpec {
    /// Name of the Solr cluster this set belongs to. Informational only.
    pub cluster_name: String,

    /// Base URL used to reach the Solr admin API
    pub cluster_url: String,

    /// Name of the Secret holding the Solr basic-auth credentials
    /// (`username`/`password` fields)
    pub secret_name: String,

    /// Whether this set is actively managed. When false the reconciler
    /// never contacts the cluster. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    /// Replication factor applied uniformly to every collection in the set.
    /// Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i32>,

    /// Whether each collection is doubled into `_blue`/`_green` instances
    /// fronted by an alias. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_green_enabled: Option<bool>,

    /// Whether collections absent from the spec are deleted from the
    /// cluster. Defaults to false, which allows several sets to share one
    /// cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_enabled: Option<bool>,

    /// The collections to manage
    #[serde(default)]
    pub collections: Vec<SolrCollection>,
}

/// One logical collection within a set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SolrCollection {
    /// Name of the collection. With blue/green enabled the engine-side
    /// instances are `<name>_blue` and `<name>_green`.
    pub name: String,

    /// Alias created for this collection when blue/green is enabled.
    /// Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Name of the configset (and of the ConfigMap `collection` label)
    /// backing this collection. Defaults to `alias`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configset_name: Option<String>,
}

impl SolrCollection {
    /// Effective alias, falling back to the collection name
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Effective configset name, falling back to the alias
    pub fn configset_name(&self) -> &str {
        self.configset_name.as_deref().unwrap_or_else(|| self.alias())
    }

    /// Validate the collection name against the allowed pattern
    /// `[a-zA-Z0-9]([-_a-zA-Z0-9]*[a-zA-Z0-9])?`, 1-100 characters.
    ///
    /// The pattern rejects a leading underscore, which keeps user names out
    /// of the operator-reserved namespace.
    pub fn validate(&self) -> Result<(), String> {
        validate_name("name", &self.name)?;
        if let Some(ref alias) = self.alias {
            validate_name("alias", alias)?;
        }
        if let Some(ref configset) = self.configset_name {
            validate_name("configsetName", configset)?;
        }
        Ok(())
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "{field} [{value}] must be 1-{MAX_NAME_LENGTH} characters"
        ));
    }
    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_alphanumeric();
    let inner_ok = |b: u8| b.is_ascii_alphanumeric() || b == b'-' || b == b'_';
    if !edge_ok(bytes[0])
        || !edge_ok(bytes[bytes.len() - 1])
        || !bytes.iter().all(|&b| inner_ok(b))
    {
        return Err(format!(
            "{field} [{value}] must match [a-zA-Z0-9]([-_a-zA-Z0-9]*[a-zA-Z0-9])?"
        ));
    }
    Ok(())
}

impl SolrCollectionSetSpec {
    /// Effective `active` value
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(DEFAULT_ACTIVE)
    }

    /// Effective replication factor
    pub fn replication_factor(&self) -> i32 {
        self.replication_factor
            .unwrap_or(DEFAULT_REPLICATION_FACTOR)
    }

    /// Effective `blueGreenEnabled` value
    pub fn blue_green_enabled(&self) -> bool {
        self.blue_green_enabled.unwrap_or(DEFAULT_BLUE_GREEN_ENABLED)
    }

    /// Effective `cleanupEnabled` value
    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup_enabled.unwrap_or(DEFAULT_CLEANUP_ENABLED)
    }

    /// Fill in unset optional fields, returning whether anything changed.
    ///
    /// Applying this twice never reports a change the second time.
    pub fn apply_defaults(&mut self) -> bool {
        let mut changed = false;

        if self.active.is_none() {
            self.active = Some(DEFAULT_ACTIVE);
            changed = true;
        }
        if self.blue_green_enabled.is_none() {
            self.blue_green_enabled = Some(DEFAULT_BLUE_GREEN_ENABLED);
            changed = true;
        }
        if self.cleanup_enabled.is_none() {
            self.cleanup_enabled = Some(DEFAULT_CLEANUP_ENABLED);
            changed = true;
        }
        if self.replication_factor.is_none() {
            self.replication_factor = Some(DEFAULT_REPLICATION_FACTOR);
            changed = true;
        }

        for collection in &mut self.collections {
            if collection.alias.is_none() {
                collection.alias = Some(collection.name.clone());
                changed = true;
            }
            if collection.configset_name.is_none() {
                collection.configset_name = collection.alias.clone();
                changed = true;
            }
        }

        changed
    }

    /// Validate the spec: a positive replication factor and well-formed
    /// collection names.
    pub fn validate(&self) -> Result<(), String> {
        if self.replication_factor() < 1 {
            return Err("replicationFactor must be a positive integer".to_string());
        }
        for collection in &self.collections {
            collection.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of a SolrCollectionSet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SolrCollectionSetStatus {
    /// Current conditions. The only type this operator emits is `Stable`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Replication factor the set is converging toward
    #[serde(default)]
    pub replication_factor: i32,

    /// Provisioned vs specified instance count, as `"observed/desired"`
    #[serde(default)]
    pub ready_ratio: String,

    /// Overall scaling state of the set; mirrors the `Stable` reason
    #[serde(default)]
    pub scale_status: String,

    /// Per-instance collection statuses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<SolrCollectionStatus>,
}

/// Observed state of one engine-side collection instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SolrCollectionStatus {
    /// Specified collection name, without any blue/green suffix
    pub name: String,

    /// Engine-side instance name (carries the blue/green suffix)
    pub instance_name: String,

    /// Configset the instance is expected to use
    pub configset: String,

    /// Whether the instance exists in the cluster
    pub exists: bool,

    /// Whether the instance is live: blue/green is off, or an alias points
    /// at an instance of this collection
    pub active: bool,

    /// Whether this instance is one half of a blue/green pair
    pub blue_green: bool,

    /// Replication factor the engine reports for the instance
    pub replication_factor: i32,

    /// Number of replicas currently running
    pub replicas: i32,

    /// `"replicas/replicationFactor"`, or `"--"` before the instance exists
    pub replication_status: String,
}

// =============================================================================
// Conditions
// =============================================================================

/// Type of the single condition this operator reports
pub const CONDITION_STABLE: &str = "Stable";

/// Reasons attached to the `Stable` condition
pub mod reasons {
    /// Spec and cluster state are aligned
    pub const STABLE: &str = "stable";
    /// The set (or the operator's bookkeeping collection) is being initialized
    pub const INITIALIZING: &str = "initializing";
    /// Collection replicas are being reduced
    pub const SCALING_IN: &str = "scalingIn";
    /// Collection replicas are being increased
    pub const SCALING_OUT: &str = "scalingOut";
    /// Collections are being added to the cluster
    pub const ADDING_COLLECTIONS: &str = "addingCollections";
    /// Collections are being removed from the cluster
    pub const REMOVING_COLLECTIONS: &str = "removingCollections";
    /// An engine-side replication factor differs from the spec
    pub const REPLICATION_FACTOR_MISMATCH: &str = "replicationFactorMismatch";
    /// The reconcile pass hit an error
    pub const ERROR_ENCOUNTERED: &str = "errorEncountered";
}

/// Status of a condition: True, False, or Unknown
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition has not been evaluated yet
    Unknown,
}

/// A single observed condition on the collection set
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. `Stable`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason, drawn from [`reasons`]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned.
    ///
    /// Never part of equality checks: comparing by timestamp would make
    /// every status write look like a change and retrigger the watch.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Compare by identity fields (type, status, reason, message) only
    pub fn matches(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl SolrCollectionSetStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition with the same type.
    ///
    /// When an existing condition matches on identity fields it is kept
    /// as-is so `lastTransitionTime` only moves on real transitions.
    /// Returns whether the condition set changed.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.matches(&condition) {
                    false
                } else {
                    *existing = condition;
                    true
                }
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
