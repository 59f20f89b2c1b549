//! Change-plan executor
//!
//! Applies the planner's buckets in order against the engine. A failed
//! operation is logged and counted but never aborts its bucket; the one
//! exception is capacity backpressure from an add-replicas call, which ends
//! the pass immediately (further additions would race the external
//! autoscaler). Any successful mutation marks the outcome `changed` so the
//! controller requeues at once and the next pass plans from post-mutation
//! state.

use tracing::{info, warn};

use crate::checksums::ChecksumStore;
use crate::plan::ChangePlan;
use crate::solr::{ReplicaAddition, SolrApi};

/// What a pass actually did
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// At least one mutation succeeded; replan immediately
    pub changed: bool,
    /// The engine reported insufficient capacity; requeue with backoff
    pub scaling: bool,
    /// Messages of the operations that failed
    pub failures: Vec<String>,
}

impl ExecutionOutcome {
    fn record<T>(&mut self, result: Result<T, crate::solr::SolrError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.changed = true;
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "plan operation failed");
                self.failures.push(e.to_string());
                None
            }
        }
    }
}

/// Apply a change plan. Never fails as a whole; per-operation errors are
/// collected in the outcome.
pub async fn execute(
    solr: &dyn SolrApi,
    checksums: &ChecksumStore<'_>,
    plan: &ChangePlan,
) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::default();

    for upload in &plan.configset_uploads {
        info!(configset = %upload.name, "uploading configset");
        if outcome
            .record(solr.upload_configset(&upload.name, &upload.bytes).await)
            .is_some()
        {
            // The checksum must reflect what the engine now holds, so it is
            // only written after the upload landed.
            if let Err(e) = checksums.write(&upload.name, &upload.checksum).await {
                warn!(configset = %upload.name, error = %e, "checksum write failed");
                outcome.failures.push(e.to_string());
            }
        }
    }

    for create in &plan.creates {
        info!(collection = %create.name, configset = %create.configset, "creating collection");
        let created = outcome.record(
            solr.create_collection(&create.name, &create.configset, create.replication_factor)
                .await,
        );
        if created.is_some() {
            if let Some(ref alias) = create.alias {
                info!(alias = %alias, collection = %create.name, "assigning alias");
                outcome.record(solr.assign_alias(alias, &create.name).await);
            }
        }
    }

    for alias in &plan.alias_deletes {
        info!(alias = %alias, "deleting alias");
        outcome.record(solr.delete_alias(alias).await);
    }

    for collection in &plan.collection_deletes {
        info!(collection = %collection, "deleting collection");
        outcome.record(solr.delete_collection(collection).await);
    }

    for configset in &plan.configset_deletes {
        info!(configset = %configset, "deleting configset");
        outcome.record(solr.delete_configset(configset).await);
    }

    for change in &plan.rf_changes {
        info!(
            collection = %change.collection,
            replication_factor = change.replication_factor,
            "adjusting replication factor"
        );
        outcome.record(
            solr.set_replication_factor(&change.collection, change.replication_factor)
                .await,
        );
    }

    for change in &plan.replica_changes {
        if change.delta > 0 {
            info!(collection = %change.collection, count = change.delta, "adding replicas");
            match solr.add_replicas(&change.collection, change.delta).await {
                Ok(ReplicaAddition::Added) => outcome.changed = true,
                Ok(ReplicaAddition::Backpressure) => {
                    info!(
                        collection = %change.collection,
                        "not enough eligible nodes; waiting for capacity"
                    );
                    outcome.scaling = true;
                    return outcome;
                }
                Err(e) => {
                    warn!(collection = %change.collection, error = %e, "add replicas failed");
                    outcome.failures.push(e.to_string());
                }
            }
        } else {
            info!(collection = %change.collection, count = -change.delta, "removing replicas");
            outcome.record(solr.remove_replicas(&change.collection, -change.delta).await);
        }
    }

    outcome
}
