//! SolrCollectionSet operator entry point

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use solrset_common::crd::SolrCollectionSet;
use solrset_common::events::KubeEventPublisher;
use solrset_operator::{error_policy, reconcile, Context};

const CONTROLLER_NAME: &str = "solrset-operator";

/// Declarative management of Solr collections, aliases, and configsets
#[derive(Parser, Debug)]
#[command(name = "solrset-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    solrset_common::install_crypto_provider();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&SolrCollectionSet::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller().await
}

/// Ensure the SolrCollectionSet CRD is installed.
///
/// The operator installs its own CRD on startup using server-side apply, so
/// the stored CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing SolrCollectionSet CRD...");
    crds.patch(
        "solrcollectionsets.solrset.dev",
        &params,
        &Patch::Apply(&SolrCollectionSet::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install SolrCollectionSet CRD: {}", e))?;

    Ok(())
}

async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("SolrCollectionSet controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let publisher = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(client.clone(), publisher));

    let sets: Api<SolrCollectionSet> = Api::all(client);

    Controller::new(sets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("SolrCollectionSet controller shutting down");
    Ok(())
}
