//! SolrCollectionSet reconciliation controller
//!
//! One pass: fetch the set, seed the `Stable` condition, persist defaults,
//! then converge the cluster: bootstrap the checksum collection, snapshot
//! cluster state, report status, plan drift, and execute the plan. A pass
//! that mutated the cluster requeues immediately so the next one plans from
//! post-mutation state; capacity backpressure requeues with a fixed delay
//! and is not an error.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use thiserror::Error;
use tracing::{info, warn};

use solrset_common::crd::{
    reasons, Condition, ConditionStatus, SolrCollectionSet, SolrCollectionSetSpec,
    CONDITION_STABLE,
};
use solrset_common::events::{actions, reasons as events, EventPublisher};
use solrset_common::{
    CredentialError, SolrCredentials, COLLECTION_LABEL, COLLECTION_SET_LABEL, CONFIGSET_DATA_KEY,
    SOLR_CREDENTIALS_NAMESPACE,
};

use crate::checksums::ChecksumStore;
use crate::execute::execute;
use crate::expand::expand;
use crate::plan::{plan, PlanContext, PlanError};
use crate::solr::{SolrApi, SolrClient, SolrError};
use crate::status::{apply_status, build_status};

/// Cadence when the set is converged (or paused)
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(300);

/// Delay while the external autoscaler provides capacity for new replicas
pub const BACKPRESSURE_REQUEUE: Duration = Duration::from_secs(20);

/// Backoff after a failed pass
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

const FIELD_MANAGER: &str = "solrset-operator";

/// Reconcile errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(String),

    /// The basic-auth Secret is missing fields or malformed
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),

    /// Solr admin API error
    #[error("solr error: {0}")]
    Solr(#[from] SolrError),

    /// The spec is invalid
    #[error("validation error: {0}")]
    Validation(String),

    /// A configset ConfigMap is missing its label, its data key, or holds
    /// undecodable content
    #[error("configset source error: {0}")]
    ConfigsetSource(String),

    /// One or more plan operations failed
    #[error("plan execution error: {0}")]
    Execution(String),
}

impl From<PlanError> for ReconcileError {
    fn from(error: PlanError) -> Self {
        ReconcileError::ConfigsetSource(error.to_string())
    }
}

/// Controller context shared by every reconcile
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event sink
    pub publisher: Arc<dyn EventPublisher>,
    /// Solr clients keyed by cluster URL, built on first use. Read-only
    /// configuration after construction; safe to share across sets.
    solr_clients: RwLock<HashMap<String, Arc<SolrClient>>>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            client,
            publisher,
            solr_clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get or build the Solr client for a set's cluster URL.
    async fn solr_client(
        &self,
        spec: &SolrCollectionSetSpec,
    ) -> Result<Arc<SolrClient>, ReconcileError> {
        if let Some(existing) = self
            .solr_clients
            .read()
            .expect("solr client pool lock poisoned")
            .get(&spec.cluster_url)
        {
            return Ok(existing.clone());
        }

        info!(cluster_url = %spec.cluster_url, "instantiating a solr client");
        let secrets: Api<Secret> =
            Api::namespaced(self.client.clone(), SOLR_CREDENTIALS_NAMESPACE);
        let secret = secrets.get(&spec.secret_name).await.map_err(|e| {
            ReconcileError::Kube(format!(
                "could not read the basic auth secret [{}]: {}",
                spec.secret_name, e
            ))
        })?;
        let credentials = SolrCredentials::from_secret(&secret)?;
        let client = Arc::new(SolrClient::new(spec.cluster_url.clone(), credentials)?);

        self.solr_clients
            .write()
            .expect("solr client pool lock poisoned")
            .insert(spec.cluster_url.clone(), client.clone());
        Ok(client)
    }
}

/// Error policy: log and retry with backoff. The error condition was already
/// written by `reconcile` before the error propagated here.
pub fn error_policy(
    _set: Arc<SolrCollectionSet>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    warn!(error = %error, "reconcile error, will retry");
    Action::requeue(ERROR_REQUEUE)
}

/// Reconcile one SolrCollectionSet.
pub async fn reconcile(
    set: Arc<SolrCollectionSet>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = set.name_any();
    let namespace = set.namespace().ok_or_else(|| {
        ReconcileError::Validation("SolrCollectionSet must be namespaced".to_string())
    })?;
    let api: Api<SolrCollectionSet> = Api::namespaced(ctx.client.clone(), &namespace);

    // Re-fetch so the pass works from the freshest stored object. A deleted
    // set is acknowledged silently: without its spec there is no way to know
    // what to clean up on the engine (no finalizer by design).
    let Some(set) = api
        .get_opt(&name)
        .await
        .map_err(|e| ReconcileError::Kube(format!("failed to get SolrCollectionSet: {e}")))?
    else {
        info!(set = %name, "SolrCollectionSet not found, ignoring since it must be deleted");
        return Ok(Action::await_change());
    };

    match reconcile_inner(&api, &set, &ctx).await {
        Ok(action) => Ok(action),
        Err(error) => {
            mark_error_encountered(&api, &set, &error).await;
            Err(error)
        }
    }
}

async fn reconcile_inner(
    api: &Api<SolrCollectionSet>,
    set: &SolrCollectionSet,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let name = set.name_any();
    let namespace = set.namespace().unwrap_or_default();
    info!(set = %name, namespace = %namespace, "reconciling SolrCollectionSet");

    // Seed the Stable condition so observers see the set before the first
    // real pass completes.
    if set
        .status
        .as_ref()
        .map_or(true, |s| s.conditions.is_empty())
    {
        let mut status = set.status.clone().unwrap_or_default();
        status.set_condition(Condition::new(
            CONDITION_STABLE,
            ConditionStatus::Unknown,
            reasons::INITIALIZING,
            "Bootstrapping the operator",
        ));
        api.patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await
        .map_err(|e| ReconcileError::Kube(format!("failed to seed status conditions: {e}")))?;
        // Requeue so the next pass reads the stored object back.
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Persist defaults, then requeue immediately so this and every later
    // pass works from the stored effective values.
    let mut spec = set.spec.clone();
    if spec.apply_defaults() {
        info!(set = %name, "applying default settings");
        api.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "spec": spec })),
        )
        .await
        .map_err(|e| ReconcileError::Kube(format!("failed to apply spec defaults: {e}")))?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    spec.validate().map_err(ReconcileError::Validation)?;

    // Management is paused; don't touch the engine.
    if !spec.is_active() {
        return Ok(Action::requeue(DEFAULT_REQUEUE));
    }

    let solr = ctx.solr_client(&spec).await?;
    let solr: &dyn SolrApi = solr.as_ref();

    let mut cluster = solr.get_cluster_status().await?;

    let store = ChecksumStore::new(solr, &name);
    if let Some(fresh) = store
        .ensure_bootstrapped(&cluster, spec.replication_factor())
        .await?
    {
        cluster = fresh;
        ctx.publisher
            .publish(
                &set.object_ref(&()),
                EventType::Normal,
                events::INITIALIZING,
                actions::BOOTSTRAP,
                Some(format!(
                    "SolrCollectionSet [{name}] is being initialized in namespace [{namespace}]"
                )),
            )
            .await;
    }

    // Report against the pre-execution snapshot so the stored status
    // reflects observed state even if execution fails below.
    let report = build_status(set, &cluster);
    let patched = apply_status(api, set, &report.status)
        .await
        .map_err(|e| ReconcileError::Kube(format!("failed to save collection set status: {e}")))?;
    if patched {
        for (reason, message) in &report.events {
            ctx.publisher
                .publish(
                    &set.object_ref(&()),
                    EventType::Normal,
                    reason,
                    actions::RECONCILE,
                    Some(message.clone()),
                )
                .await;
        }
    }

    let desired = expand(&spec);
    let engine_configsets = solr.list_configsets().await?;
    let config_sources = load_configset_sources(&ctx.client, &namespace, &name).await?;
    let stored_checksums = store.read_all().await?;

    let change_plan = plan(&PlanContext {
        desired: &desired,
        cluster: &cluster,
        engine_configsets: &engine_configsets,
        config_sources: &config_sources,
        stored_checksums: &stored_checksums,
        replication_factor: spec.replication_factor(),
        cleanup_enabled: spec.cleanup_enabled(),
    })?;

    let outcome = execute(solr, &store, &change_plan).await;

    if outcome.scaling {
        info!(set = %name, "waiting for cluster capacity before adding more replicas");
        return Ok(Action::requeue(BACKPRESSURE_REQUEUE));
    }
    if !outcome.failures.is_empty() {
        return Err(ReconcileError::Execution(outcome.failures.join("; ")));
    }
    if outcome.changed {
        // Observe post-mutation cluster state before planning further drift.
        return Ok(Action::requeue(Duration::ZERO));
    }

    Ok(Action::requeue(DEFAULT_REQUEUE))
}

/// Read the configset sources for a set: ConfigMaps labelled
/// `collectionSet=<name>`, each mapping its `collection` label to the
/// base64 blob under `data.configset`.
async fn load_configset_sources(
    client: &Client,
    namespace: &str,
    set_name: &str,
) -> Result<BTreeMap<String, String>, ReconcileError> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{COLLECTION_SET_LABEL}={set_name}"));
    let list = api
        .list(&params)
        .await
        .map_err(|e| ReconcileError::Kube(format!("error listing configset ConfigMaps: {e}")))?;

    let mut sources = BTreeMap::new();
    for config_map in list {
        let cm_name = config_map.name_any();
        let target = config_map
            .labels()
            .get(COLLECTION_LABEL)
            .cloned()
            .ok_or_else(|| {
                ReconcileError::ConfigsetSource(format!(
                    "configset ConfigMap [{cm_name}] has no '{COLLECTION_LABEL}' label"
                ))
            })?;
        let blob = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIGSET_DATA_KEY))
            .cloned()
            .ok_or_else(|| {
                ReconcileError::ConfigsetSource(format!(
                    "configset ConfigMap [{cm_name}] has no '{CONFIGSET_DATA_KEY}' key"
                ))
            })?;
        sources.insert(target, blob);
    }
    Ok(sources)
}

/// Best-effort: record that the pass failed on the `Stable` condition. The
/// reconcile still returns its error so the policy backoff applies.
async fn mark_error_encountered(
    api: &Api<SolrCollectionSet>,
    set: &SolrCollectionSet,
    error: &ReconcileError,
) {
    let name = set.name_any();

    // Patch against the freshest status; the reporter may have written one
    // earlier in this same pass.
    let current = match api.get_opt(&name).await {
        Ok(Some(current)) => current,
        Ok(None) => return,
        Err(e) => {
            warn!(set = %name, error = %e, "failed to re-fetch set for error condition");
            return;
        }
    };

    let mut status = current.status.unwrap_or_default();
    let changed = status.set_condition(Condition::new(
        CONDITION_STABLE,
        ConditionStatus::False,
        reasons::ERROR_ENCOUNTERED,
        error.to_string(),
    ));
    if !changed {
        return;
    }
    status.scale_status = reasons::ERROR_ENCOUNTERED.to_string();

    if let Err(e) = api
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await
    {
        warn!(set = %name, error = %e, "failed to save error condition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_errors_map_to_configset_source() {
        let err: ReconcileError = PlanError::ConfigsetDecode("orders".to_string()).into();
        assert!(matches!(err, ReconcileError::ConfigsetSource(_)));
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn solr_errors_convert() {
        let err: ReconcileError = SolrError::Malformed("no docs".to_string()).into();
        assert!(matches!(err, ReconcileError::Solr(_)));
    }

    #[test]
    fn execution_error_joins_failures() {
        let err = ReconcileError::Execution("a; b".to_string());
        assert_eq!(err.to_string(), "plan execution error: a; b");
    }

    #[test]
    fn backpressure_requeue_is_shorter_than_error_backoff() {
        assert!(BACKPRESSURE_REQUEUE < ERROR_REQUEUE);
        assert!(ERROR_REQUEUE < DEFAULT_REQUEUE);
    }
}
