//! Status derivation and reporting
//!
//! Builds the observed `Status` document and the `Stable` condition from the
//! pre-execution cluster snapshot, and patches it only on structural change.
//! Every status write is observed back through the watch as a new reconcile,
//! so the equality gate here is what keeps the controller from retriggering
//! itself; conditions are compared by identity fields only, never by
//! timestamp.
//!
//! Events accompany condition transitions: at most one per reason per pass,
//! and none at all while the condition is unchanged.

use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use tracing::debug;

use solrset_common::crd::{
    reasons, Condition, ConditionStatus, SolrCollectionSet, SolrCollectionSetStatus,
    SolrCollectionStatus, CONDITION_STABLE,
};
use solrset_common::events::reasons as event_reasons;
use solrset_common::is_reserved;

use crate::expand::{expand, BLUE_SUFFIX, GREEN_SUFFIX};
use crate::solr::ClusterStatus;

/// Field manager used for status patches
const FIELD_MANAGER: &str = "solrset-operator";

/// A derived status plus the events that go with its condition transition
#[derive(Debug)]
pub struct StatusOutcome {
    /// The status document to persist
    pub status: SolrCollectionSetStatus,
    /// `(event reason, message)` pairs to publish, empty when the `Stable`
    /// condition did not transition
    pub events: Vec<(&'static str, String)>,
}

/// Derive the status document and condition from an observed snapshot.
pub fn build_status(set: &SolrCollectionSet, cluster: &ClusterStatus) -> StatusOutcome {
    let name = set.name_any();
    let namespace = set.namespace().unwrap_or_default();
    let spec = &set.spec;
    let replication_factor = spec.replication_factor();
    let blue_green = spec.blue_green_enabled();

    let desired = expand(spec);
    let desired_count = desired.len();
    let logical_divisor = if blue_green { 2 } else { 1 };

    // Seed one entry per desired instance; observed data overrides below.
    let mut instances: Vec<SolrCollectionStatus> = desired
        .iter()
        .map(|(instance, d)| SolrCollectionStatus {
            name: d.spec_name.clone(),
            instance_name: instance.clone(),
            configset: d.configset.clone(),
            exists: false,
            active: false,
            blue_green: d.blue_green,
            replication_factor: 0,
            replicas: 0,
            replication_status: "--".to_string(),
        })
        .collect();

    let mut observed_count = 0usize;
    let mut rf_mismatch = false;
    let mut scaling_out: Option<(i32, i32)> = None;
    let mut scaling_in: Option<(i32, i32)> = None;

    for status in &mut instances {
        let Some(observed) = cluster.collections.get(&status.instance_name) else {
            continue;
        };
        observed_count += 1;

        status.exists = true;
        status.replication_factor = observed.replication_factor;
        status.replicas = observed.replica_count;
        status.replication_status =
            format!("{}/{}", observed.replica_count, observed.replication_factor);
        status.active = !blue_green || alias_targets_spec(cluster, &desired[&status.instance_name]);

        if observed.replication_factor != replication_factor {
            rf_mismatch = true;
        }
        if observed.replica_count < observed.replication_factor {
            scaling_out = Some((observed.replica_count, observed.replication_factor));
        } else if observed.replica_count > observed.replication_factor {
            scaling_in = Some((observed.replica_count, observed.replication_factor));
        }
    }

    // Collections the operator would remove. They only unsettle the set
    // when cleanup is enabled; otherwise they belong to someone else.
    let extras = cluster
        .collections
        .keys()
        .filter(|name| !is_reserved(name) && !desired.contains_key(*name))
        .count();
    let adding = desired_count > observed_count;
    let removing = spec.cleanup_enabled() && extras > 0;

    let is_stable =
        !adding && !removing && !rf_mismatch && scaling_out.is_none() && scaling_in.is_none();

    let mut events = Vec::new();
    if let Some((replicas, target)) = scaling_out {
        events.push((
            event_reasons::SCALE_OUT,
            format!(
                "SolrCollectionSet [{name}] in namespace [{namespace}] is scaling out from [{replicas}] replicas to [{target}]"
            ),
        ));
    }
    if let Some((replicas, target)) = scaling_in {
        events.push((
            event_reasons::SCALE_IN,
            format!(
                "SolrCollectionSet [{name}] in namespace [{namespace}] is scaling in from [{replicas}] replicas to [{target}]"
            ),
        ));
    }
    if adding {
        let count = (desired_count - observed_count) / logical_divisor;
        events.push((
            event_reasons::ADDING_COLLECTION,
            format!(
                "SolrCollectionSet [{name}] in namespace [{namespace}] is adding [{count}] collections"
            ),
        ));
    }
    if removing {
        let count = (extras / logical_divisor).max(1);
        events.push((
            event_reasons::REMOVING_COLLECTION,
            format!(
                "SolrCollectionSet [{name}] in namespace [{namespace}] is removing [{count}] collections"
            ),
        ));
    }

    // Reason priority when unstable: a replication-factor mismatch trumps
    // scaling, which trumps collection count drift.
    let reason = if is_stable {
        reasons::STABLE
    } else if rf_mismatch {
        reasons::REPLICATION_FACTOR_MISMATCH
    } else if scaling_out.is_some() {
        reasons::SCALING_OUT
    } else if scaling_in.is_some() {
        reasons::SCALING_IN
    } else if adding {
        reasons::ADDING_COLLECTIONS
    } else {
        reasons::REMOVING_COLLECTIONS
    };

    let condition = if is_stable {
        Condition::new(CONDITION_STABLE, ConditionStatus::True, reason, "")
    } else {
        Condition::new(
            CONDITION_STABLE,
            ConditionStatus::False,
            reason,
            "Spec and cluster status are not aligned",
        )
    };

    let mut status = SolrCollectionSetStatus {
        conditions: set
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
        replication_factor,
        ready_ratio: format!("{observed_count}/{desired_count}"),
        scale_status: reason.to_string(),
        collections: instances,
    };

    let transitioned = status.set_condition(condition);
    if !transitioned {
        events.clear();
    }

    StatusOutcome { status, events }
}

/// Whether the instance's spec alias points at some instance of its spec name
fn alias_targets_spec(cluster: &ClusterStatus, desired: &crate::expand::DesiredInstance) -> bool {
    cluster.aliases.get(&desired.alias).is_some_and(|target| {
        *target == format!("{}{}", desired.spec_name, BLUE_SUFFIX)
            || *target == format!("{}{}", desired.spec_name, GREEN_SUFFIX)
    })
}

/// Structural equality for the patch gate. Scalar fields and per-instance
/// statuses compare directly; conditions compare by identity fields so a
/// moving `lastTransitionTime` never looks like drift.
pub fn statuses_equal(a: &SolrCollectionSetStatus, b: &SolrCollectionSetStatus) -> bool {
    a.replication_factor == b.replication_factor
        && a.ready_ratio == b.ready_ratio
        && a.scale_status == b.scale_status
        && a.collections == b.collections
        && a.conditions.len() == b.conditions.len()
        && a.conditions
            .iter()
            .zip(&b.conditions)
            .all(|(x, y)| x.matches(y))
}

/// Persist the status if it differs structurally from what is stored.
/// Returns whether a patch was written.
pub async fn apply_status(
    api: &Api<SolrCollectionSet>,
    set: &SolrCollectionSet,
    status: &SolrCollectionSetStatus,
) -> Result<bool, kube::Error> {
    let name = set.name_any();
    let current = set.status.clone().unwrap_or_default();
    if statuses_equal(&current, status) {
        debug!(set = %name, "status unchanged, skipping patch");
        return Ok(false);
    }

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solrset_common::crd::{SolrCollection, SolrCollectionSetSpec};
    use std::collections::BTreeMap;

    use crate::solr::SolrCollectionState;

    fn sample_set(names: &[&str], replication_factor: i32) -> SolrCollectionSet {
        let spec = SolrCollectionSetSpec {
            cluster_name: "search".to_string(),
            cluster_url: "http://solr:8983/solr".to_string(),
            secret_name: "solr-auth".to_string(),
            active: Some(true),
            replication_factor: Some(replication_factor),
            blue_green_enabled: Some(true),
            cleanup_enabled: Some(false),
            collections: names
                .iter()
                .map(|n| SolrCollection {
                    name: n.to_string(),
                    alias: Some(n.to_string()),
                    configset_name: Some(n.to_string()),
                })
                .collect(),
        };
        let mut set = SolrCollectionSet::new("foo", spec);
        set.metadata.namespace = Some("search-system".to_string());
        set
    }

    fn collection(name: &str, rf: i32, replicas: i32) -> (String, SolrCollectionState) {
        (
            name.to_string(),
            SolrCollectionState {
                name: name.to_string(),
                config_name: "x".to_string(),
                replication_factor: rf,
                replica_count: replicas,
            },
        )
    }

    fn cluster(
        aliases: &[(&str, &str)],
        collections: Vec<(String, SolrCollectionState)>,
    ) -> ClusterStatus {
        ClusterStatus {
            aliases: aliases
                .iter()
                .map(|(a, t)| (a.to_string(), t.to_string()))
                .collect(),
            collections: collections.into_iter().collect(),
        }
    }

    #[test]
    fn empty_cluster_reports_adding_collections() {
        let set = sample_set(&["x"], 1);
        let outcome = build_status(&set, &ClusterStatus::default());

        assert_eq!(outcome.status.ready_ratio, "0/2");
        assert_eq!(outcome.status.scale_status, reasons::ADDING_COLLECTIONS);
        let stable = outcome.status.condition(CONDITION_STABLE).unwrap();
        assert_eq!(stable.status, ConditionStatus::False);
        assert_eq!(stable.reason, reasons::ADDING_COLLECTIONS);

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].0, event_reasons::ADDING_COLLECTION);
        assert!(outcome.events[0].1.contains("adding [1] collections"));
    }

    #[test]
    fn converged_pair_is_stable() {
        let set = sample_set(&["x"], 1);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![
                collection("x_blue", 1, 1),
                collection("x_green", 1, 1),
                collection("_fooChecksums", 1, 1),
            ],
        );

        let outcome = build_status(&set, &cluster);
        assert_eq!(outcome.status.ready_ratio, "2/2");
        assert_eq!(outcome.status.scale_status, reasons::STABLE);
        let stable = outcome.status.condition(CONDITION_STABLE).unwrap();
        assert_eq!(stable.status, ConditionStatus::True);
        assert_eq!(stable.reason, reasons::STABLE);
    }

    #[test]
    fn unmanaged_extras_are_ignored_without_cleanup() {
        let set = sample_set(&["x"], 1);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![
                collection("x_blue", 1, 1),
                collection("x_green", 1, 1),
                collection("y", 1, 1),
            ],
        );

        let outcome = build_status(&set, &cluster);
        assert_eq!(outcome.status.ready_ratio, "2/2");
        assert_eq!(
            outcome.status.condition(CONDITION_STABLE).unwrap().reason,
            reasons::STABLE
        );
    }

    #[test]
    fn extras_count_as_removals_with_cleanup() {
        let mut set = sample_set(&["x"], 1);
        set.spec.cleanup_enabled = Some(true);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![
                collection("x_blue", 1, 1),
                collection("x_green", 1, 1),
                collection("y", 1, 1),
            ],
        );

        let outcome = build_status(&set, &cluster);
        assert_eq!(
            outcome.status.condition(CONDITION_STABLE).unwrap().reason,
            reasons::REMOVING_COLLECTIONS
        );
        assert!(outcome
            .events
            .iter()
            .any(|(reason, _)| *reason == event_reasons::REMOVING_COLLECTION));
    }

    #[test]
    fn lagging_replicas_report_scaling_out() {
        let set = sample_set(&["x"], 3);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 3, 1), collection("x_green", 3, 1)],
        );

        let outcome = build_status(&set, &cluster);
        let stable = outcome.status.condition(CONDITION_STABLE).unwrap();
        assert_eq!(stable.reason, reasons::SCALING_OUT);
        assert_eq!(outcome.status.scale_status, reasons::SCALING_OUT);
        assert!(outcome
            .events
            .iter()
            .any(|(reason, message)| *reason == event_reasons::SCALE_OUT
                && message.contains("from [1] replicas to [3]")));
    }

    #[test]
    fn rf_mismatch_outranks_scaling() {
        let set = sample_set(&["x"], 3);
        // Engine still has rf=1 and is also short on replicas vs its rf.
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 1, 0), collection("x_green", 1, 1)],
        );

        let outcome = build_status(&set, &cluster);
        assert_eq!(
            outcome.status.condition(CONDITION_STABLE).unwrap().reason,
            reasons::REPLICATION_FACTOR_MISMATCH
        );
    }

    #[test]
    fn alias_marks_both_siblings_active() {
        let set = sample_set(&["x"], 1);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 1, 1), collection("x_green", 1, 1)],
        );

        let outcome = build_status(&set, &cluster);
        let by_instance: BTreeMap<&str, &SolrCollectionStatus> = outcome
            .status
            .collections
            .iter()
            .map(|c| (c.instance_name.as_str(), c))
            .collect();
        assert!(by_instance["x_blue"].active);
        assert!(by_instance["x_green"].active);
        assert!(by_instance["x_blue"].exists);
        assert_eq!(by_instance["x_blue"].replication_status, "1/1");
    }

    #[test]
    fn missing_alias_leaves_instances_inactive() {
        let set = sample_set(&["x"], 1);
        let cluster = cluster(
            &[],
            vec![collection("x_blue", 1, 1), collection("x_green", 1, 1)],
        );

        let outcome = build_status(&set, &cluster);
        assert!(outcome.status.collections.iter().all(|c| !c.active));
    }

    #[test]
    fn unchanged_inputs_do_not_flap() {
        let mut set = sample_set(&["x"], 1);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 1, 1), collection("x_green", 1, 1)],
        );

        let first = build_status(&set, &cluster);
        set.status = Some(first.status.clone());

        let second = build_status(&set, &cluster);
        assert!(statuses_equal(&first.status, &second.status));
        assert!(second.events.is_empty());
        // The transition timestamp was carried forward untouched.
        assert_eq!(
            first
                .status
                .condition(CONDITION_STABLE)
                .unwrap()
                .last_transition_time,
            second
                .status
                .condition(CONDITION_STABLE)
                .unwrap()
                .last_transition_time,
        );
    }

    #[test]
    fn repeated_instability_emits_no_new_events() {
        let mut set = sample_set(&["x"], 3);
        let cluster = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 3, 1), collection("x_green", 3, 1)],
        );

        let first = build_status(&set, &cluster);
        assert!(!first.events.is_empty());
        set.status = Some(first.status);

        let second = build_status(&set, &cluster);
        assert!(second.events.is_empty());
    }

    #[test]
    fn seeded_condition_transitions_to_observed_state() {
        let mut set = sample_set(&["x"], 1);
        let mut seeded = SolrCollectionSetStatus::default();
        seeded.set_condition(Condition::new(
            CONDITION_STABLE,
            ConditionStatus::Unknown,
            reasons::INITIALIZING,
            "Bootstrapping the operator",
        ));
        set.status = Some(seeded);

        let outcome = build_status(&set, &ClusterStatus::default());
        let stable = outcome.status.condition(CONDITION_STABLE).unwrap();
        assert_eq!(stable.status, ConditionStatus::False);
        assert_eq!(stable.reason, reasons::ADDING_COLLECTIONS);
        assert!(!outcome.events.is_empty());
    }

    #[test]
    fn statuses_differ_when_ratio_moves() {
        let set = sample_set(&["x"], 1);
        let a = build_status(&set, &ClusterStatus::default()).status;
        let converged = cluster(
            &[("x", "x_blue")],
            vec![collection("x_blue", 1, 1), collection("x_green", 1, 1)],
        );
        let b = build_status(&set, &converged).status;
        assert!(!statuses_equal(&a, &b));
    }
}
