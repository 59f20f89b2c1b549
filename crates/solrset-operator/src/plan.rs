//! Drift planner
//!
//! Pure comparison of desired state against an observed cluster snapshot,
//! producing the ordered [`ChangePlan`] the executor applies. Bucket order
//! matters: configsets precede the creates that reference them, alias
//! deletes precede the collection deletes they pin, and replication-factor
//! changes precede replica changes because the engine uses the factor as the
//! target for auto-placement.
//!
//! Reserved (`_`-prefixed) objects are filtered out of every cleanup bucket
//! regardless of `cleanupEnabled`. All output buckets are sorted by name, so
//! the plan is identical however the inputs were iterated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use solrset_common::is_reserved;

use crate::checksums::checksum_of;
use crate::expand::DesiredInstances;
use crate::solr::ClusterStatus;

/// Errors while computing a plan
#[derive(Debug, Error)]
pub enum PlanError {
    /// A configset source blob is not valid base64
    #[error("could not base64 decode the configset source for [{0}]")]
    ConfigsetDecode(String),
}

/// Upload of one configset plus the checksum to record afterwards
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigsetUpload {
    /// Configset name
    pub name: String,
    /// Decoded zip bytes to stream to the engine
    pub bytes: Vec<u8>,
    /// MD5 hex of the base64 source, written after a successful upload
    pub checksum: String,
}

/// Creation of one collection instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionCreate {
    /// Instance name
    pub name: String,
    /// Configset to create it from
    pub configset: String,
    /// Replication factor at creation
    pub replication_factor: i32,
    /// Alias to point at this instance once created, when this instance
    /// wins the alias for its blue/green pair
    pub alias: Option<String>,
}

/// Replication-factor correction for one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationFactorChange {
    /// Instance name
    pub collection: String,
    /// Factor to set
    pub replication_factor: i32,
}

/// Replica-count correction for one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaChange {
    /// Instance name
    pub collection: String,
    /// Positive to add replicas, negative to remove
    pub delta: i32,
}

/// The ordered set of mutations one reconcile pass will apply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangePlan {
    /// Configset uploads, each followed by a checksum write
    pub configset_uploads: Vec<ConfigsetUpload>,
    /// Collection creations (with alias assignments folded in)
    pub creates: Vec<CollectionCreate>,
    /// Alias deletions; must run before collection deletions
    pub alias_deletes: Vec<String>,
    /// Collection deletions
    pub collection_deletes: Vec<String>,
    /// Configset deletions
    pub configset_deletes: Vec<String>,
    /// Replication-factor corrections
    pub rf_changes: Vec<ReplicationFactorChange>,
    /// Replica add/remove corrections
    pub replica_changes: Vec<ReplicaChange>,
}

impl ChangePlan {
    /// Whether the pass has nothing to do
    pub fn is_empty(&self) -> bool {
        self.configset_uploads.is_empty()
            && self.creates.is_empty()
            && self.alias_deletes.is_empty()
            && self.collection_deletes.is_empty()
            && self.configset_deletes.is_empty()
            && self.rf_changes.is_empty()
            && self.replica_changes.is_empty()
    }
}

/// Everything the planner compares
pub struct PlanContext<'a> {
    /// Desired instances from the expander
    pub desired: &'a DesiredInstances,
    /// Observed cluster snapshot
    pub cluster: &'a ClusterStatus,
    /// Configsets present in the engine
    pub engine_configsets: &'a [String],
    /// configset name -> base64 blob, from the labelled ConfigMaps
    pub config_sources: &'a BTreeMap<String, String>,
    /// configset name -> md5 hex, from the checksum collection
    pub stored_checksums: &'a HashMap<String, String>,
    /// Replication factor every instance should have
    pub replication_factor: i32,
    /// Whether unspecified collections/configsets get deleted
    pub cleanup_enabled: bool,
}

/// Compare desired and observed state and produce the change plan.
pub fn plan(ctx: &PlanContext<'_>) -> Result<ChangePlan, PlanError> {
    let mut out = ChangePlan::default();
    let engine_configsets: BTreeSet<&str> =
        ctx.engine_configsets.iter().map(String::as_str).collect();

    // Configset uploads. Blue/green siblings share a configset, so dedupe
    // by configset name; a set uploads when the engine has never seen it,
    // when no checksum is on record, or when the recorded checksum no
    // longer matches the source.
    let mut seen_configsets = BTreeSet::new();
    for instance in ctx.desired.values() {
        if !seen_configsets.insert(instance.configset.as_str()) {
            continue;
        }
        let Some(blob) = ctx.config_sources.get(&instance.configset) else {
            continue;
        };
        let checksum = checksum_of(blob);
        let current = ctx.stored_checksums.get(&instance.configset);
        if engine_configsets.contains(instance.configset.as_str())
            && current == Some(&checksum)
        {
            continue;
        }
        let bytes = BASE64
            .decode(blob)
            .map_err(|_| PlanError::ConfigsetDecode(instance.configset.clone()))?;
        out.configset_uploads.push(ConfigsetUpload {
            name: instance.configset.clone(),
            bytes,
            checksum,
        });
    }

    // Creates. The desired map iterates in name order, so when a fresh
    // blue/green pair needs its alias the lexicographically-first instance
    // wins it deterministically.
    let mut aliases_assigned = BTreeSet::new();
    for (name, instance) in ctx.desired {
        if ctx.cluster.collections.contains_key(name) {
            continue;
        }
        let alias = (instance.blue_green
            && !ctx.cluster.aliases.contains_key(&instance.alias)
            && aliases_assigned.insert(instance.alias.clone()))
        .then(|| instance.alias.clone());
        out.creates.push(CollectionCreate {
            name: name.clone(),
            configset: instance.configset.clone(),
            replication_factor: ctx.replication_factor,
            alias,
        });
    }

    // Cleanup: observed collections (and their aliases) with no desired
    // counterpart, and configsets with no source. Reserved names are
    // untouchable here whatever the flag says.
    if ctx.cleanup_enabled {
        let alias_by_target: BTreeMap<&str, &str> = ctx
            .cluster
            .aliases
            .iter()
            .map(|(alias, target)| (target.as_str(), alias.as_str()))
            .collect();

        for name in ctx.cluster.collections.keys() {
            if ctx.desired.contains_key(name) || is_reserved(name) {
                continue;
            }
            if let Some(alias) = alias_by_target.get(name.as_str()) {
                out.alias_deletes.push((*alias).to_string());
            }
            out.collection_deletes.push(name.clone());
        }

        for name in &engine_configsets {
            if !ctx.config_sources.contains_key(*name) && !is_reserved(name) {
                out.configset_deletes.push((*name).to_string());
            }
        }
    }

    // Corrections for instances that exist: replication factor first, then
    // replica count toward the spec.
    for (name, _) in ctx.desired {
        let Some(observed) = ctx.cluster.collections.get(name) else {
            continue;
        };
        if observed.replication_factor != ctx.replication_factor {
            out.rf_changes.push(ReplicationFactorChange {
                collection: name.clone(),
                replication_factor: ctx.replication_factor,
            });
        }
        let delta = ctx.replication_factor - observed.replica_count;
        if delta != 0 {
            out.replica_changes.push(ReplicaChange {
                collection: name.clone(),
                delta,
            });
        }
    }

    out.alias_deletes.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::DesiredInstance;
    use crate::solr::SolrCollectionState;

    fn desired_pair(spec_name: &str) -> DesiredInstances {
        let template = DesiredInstance {
            spec_name: spec_name.to_string(),
            alias: spec_name.to_string(),
            configset: spec_name.to_string(),
            blue_green: true,
        };
        let mut desired = DesiredInstances::new();
        desired.insert(format!("{spec_name}_blue"), template.clone());
        desired.insert(format!("{spec_name}_green"), template);
        desired
    }

    fn observed(name: &str, configset: &str, rf: i32, replicas: i32) -> SolrCollectionState {
        SolrCollectionState {
            name: name.to_string(),
            config_name: configset.to_string(),
            replication_factor: rf,
            replica_count: replicas,
        }
    }

    fn cluster_with(collections: &[SolrCollectionState]) -> ClusterStatus {
        ClusterStatus {
            aliases: BTreeMap::new(),
            collections: collections
                .iter()
                .map(|c| (c.name.clone(), c.clone()))
                .collect(),
        }
    }

    fn context<'a>(
        desired: &'a DesiredInstances,
        cluster: &'a ClusterStatus,
        engine_configsets: &'a [String],
        config_sources: &'a BTreeMap<String, String>,
        stored_checksums: &'a HashMap<String, String>,
    ) -> PlanContext<'a> {
        PlanContext {
            desired,
            cluster,
            engine_configsets,
            config_sources,
            stored_checksums,
            replication_factor: 1,
            cleanup_enabled: false,
        }
    }

    #[test]
    fn fresh_pair_creates_both_instances_and_blue_wins_the_alias() {
        let desired = desired_pair("x");
        let cluster = ClusterStatus::default();
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();

        assert_eq!(plan.creates.len(), 2);
        assert_eq!(plan.creates[0].name, "x_blue");
        assert_eq!(plan.creates[0].alias.as_deref(), Some("x"));
        assert_eq!(plan.creates[1].name, "x_green");
        assert_eq!(plan.creates[1].alias, None);
    }

    #[test]
    fn existing_alias_is_never_reassigned() {
        let desired = desired_pair("x");
        let mut cluster = cluster_with(&[observed("x_green", "x", 1, 1)]);
        cluster
            .aliases
            .insert("x".to_string(), "x_green".to_string());
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();

        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].name, "x_blue");
        assert_eq!(plan.creates[0].alias, None);
    }

    #[test]
    fn no_alias_obligation_without_blue_green() {
        let mut desired = DesiredInstances::new();
        desired.insert(
            "x".to_string(),
            DesiredInstance {
                spec_name: "x".to_string(),
                alias: "x".to_string(),
                configset: "x".to_string(),
                blue_green: false,
            },
        );
        let cluster = ClusterStatus::default();
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].alias, None);
    }

    #[test]
    fn reserved_collections_survive_cleanup() {
        let desired = desired_pair("x");
        let mut cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
            observed("_fooChecksums", "_checksums", 1, 1),
        ]);
        cluster
            .aliases
            .insert("_shadow".to_string(), "_fooChecksums".to_string());
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let mut ctx = context(&desired, &cluster, &[], &sources, &checksums);
        ctx.cleanup_enabled = true;
        let plan = plan(&ctx).unwrap();

        assert!(plan.collection_deletes.is_empty());
        assert!(plan.alias_deletes.is_empty());
    }

    #[test]
    fn unlisted_collections_are_kept_without_cleanup() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
            observed("y", "y", 1, 1),
        ]);
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn cleanup_deletes_alias_before_collection() {
        let desired = desired_pair("x");
        let mut cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
            observed("y_blue", "y", 1, 1),
        ]);
        cluster
            .aliases
            .insert("y".to_string(), "y_blue".to_string());
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let mut ctx = context(&desired, &cluster, &[], &sources, &checksums);
        ctx.cleanup_enabled = true;
        let plan = plan(&ctx).unwrap();

        assert_eq!(plan.alias_deletes, vec!["y".to_string()]);
        assert_eq!(plan.collection_deletes, vec!["y_blue".to_string()]);
    }

    #[test]
    fn cleanup_deletes_sourceless_configsets_but_not_reserved_ones() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
        ]);
        let engine_configsets = vec![
            "x".to_string(),
            "stale".to_string(),
            "_checksums".to_string(),
        ];
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), BASE64.encode(b"zip"));
        let checksums: HashMap<String, String> = [(
            "x".to_string(),
            checksum_of(&BASE64.encode(b"zip")),
        )]
        .into();

        let mut ctx = context(&desired, &cluster, &engine_configsets, &sources, &checksums);
        ctx.cleanup_enabled = true;
        let plan = plan(&ctx).unwrap();

        assert_eq!(plan.configset_deletes, vec!["stale".to_string()]);
    }

    #[test]
    fn matching_checksum_suppresses_reupload() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
        ]);
        let engine_configsets = vec!["x".to_string()];
        let blob = BASE64.encode(b"schema files");
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), blob.clone());
        let checksums: HashMap<String, String> = [("x".to_string(), checksum_of(&blob))].into();

        let plan = plan(&context(
            &desired,
            &cluster,
            &engine_configsets,
            &sources,
            &checksums,
        ))
        .unwrap();

        assert!(plan.configset_uploads.is_empty());
    }

    #[test]
    fn changed_source_requeues_upload_with_new_checksum() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
        ]);
        let engine_configsets = vec!["x".to_string()];
        let blob = BASE64.encode(b"new schema");
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), blob.clone());
        let checksums: HashMap<String, String> =
            [("x".to_string(), "stale-checksum".to_string())].into();

        let plan = plan(&context(
            &desired,
            &cluster,
            &engine_configsets,
            &sources,
            &checksums,
        ))
        .unwrap();

        assert_eq!(plan.configset_uploads.len(), 1);
        let upload = &plan.configset_uploads[0];
        assert_eq!(upload.name, "x");
        assert_eq!(upload.bytes, b"new schema");
        assert_eq!(upload.checksum, checksum_of(&blob));
    }

    #[test]
    fn missing_stored_checksum_forces_upload() {
        let desired = desired_pair("x");
        let cluster = ClusterStatus::default();
        let engine_configsets = vec!["x".to_string()];
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), BASE64.encode(b"zip"));
        let checksums = HashMap::new();

        let plan = plan(&context(
            &desired,
            &cluster,
            &engine_configsets,
            &sources,
            &checksums,
        ))
        .unwrap();

        assert_eq!(plan.configset_uploads.len(), 1);
    }

    #[test]
    fn shared_configset_uploads_once_for_a_pair() {
        let desired = desired_pair("x");
        let cluster = ClusterStatus::default();
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), BASE64.encode(b"zip"));
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();
        assert_eq!(plan.configset_uploads.len(), 1);
    }

    #[test]
    fn invalid_base64_is_a_plan_error() {
        let desired = desired_pair("x");
        let cluster = ClusterStatus::default();
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), "not base64 !!!".to_string());
        let checksums = HashMap::new();

        let err = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap_err();
        assert!(matches!(err, PlanError::ConfigsetDecode(name) if name == "x"));
    }

    #[test]
    fn replication_factor_change_produces_both_corrections() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
        ]);
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let mut ctx = context(&desired, &cluster, &[], &sources, &checksums);
        ctx.replication_factor = 3;
        let plan = plan(&ctx).unwrap();

        assert_eq!(plan.rf_changes.len(), 2);
        assert!(plan
            .rf_changes
            .iter()
            .all(|c| c.replication_factor == 3));
        assert_eq!(plan.replica_changes.len(), 2);
        assert!(plan.replica_changes.iter().all(|c| c.delta == 2));
    }

    #[test]
    fn excess_replicas_plan_a_negative_delta() {
        let desired = desired_pair("x");
        let cluster = cluster_with(&[
            observed("x_blue", "x", 1, 3),
            observed("x_green", "x", 1, 1),
        ]);
        let sources = BTreeMap::new();
        let checksums = HashMap::new();

        let plan = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();
        assert_eq!(plan.replica_changes.len(), 1);
        assert_eq!(plan.replica_changes[0].collection, "x_blue");
        assert_eq!(plan.replica_changes[0].delta, -2);
    }

    #[test]
    fn converged_state_plans_nothing() {
        let desired = desired_pair("x");
        let mut cluster = cluster_with(&[
            observed("x_blue", "x", 1, 1),
            observed("x_green", "x", 1, 1),
        ]);
        cluster
            .aliases
            .insert("x".to_string(), "x_blue".to_string());
        let engine_configsets = vec!["x".to_string()];
        let blob = BASE64.encode(b"zip");
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), blob.clone());
        let checksums: HashMap<String, String> = [("x".to_string(), checksum_of(&blob))].into();

        let plan = plan(&context(
            &desired,
            &cluster,
            &engine_configsets,
            &sources,
            &checksums,
        ))
        .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_is_stable_under_input_reordering() {
        // BTreeMap inputs iterate sorted whatever order they were built in;
        // the buckets of two differently-built contexts must match.
        let desired = desired_pair("x");
        let mut desired_rev = DesiredInstances::new();
        for (k, v) in desired.iter().rev() {
            desired_rev.insert(k.clone(), v.clone());
        }
        let cluster = ClusterStatus::default();
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), BASE64.encode(b"zip"));
        let checksums = HashMap::new();

        let a = plan(&context(&desired, &cluster, &[], &sources, &checksums)).unwrap();
        let b = plan(&context(&desired_rev, &cluster, &[], &sources, &checksums)).unwrap();
        assert_eq!(a, b);
    }
}
