//! dtrain operator binary: registers the TrainingJob CRD and runs the
//! reconciliation controller.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::core::CustomResourceExt;
use kube::runtime::wait::{await_condition, conditions};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dtrain_operator::controller::{error_policy, reconcile, Context};
use dtrain_operator::crd::TrainingJob;
use dtrain_operator::gateway::KubeGateway;

const CRD_NAME: &str = "trainingjobs.dtrain.dev";
const FIELD_MANAGER: &str = "dtrain-operator";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        CRD_NAME,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Apply(TrainingJob::crd()),
    )
    .await?;
    tokio::time::timeout(
        Duration::from_secs(10),
        await_condition(crds, CRD_NAME, conditions::is_crd_established()),
    )
    .await??;

    tracing::info!("TrainingJob CRD established, starting controller");

    let jobs: Api<TrainingJob> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(KubeGateway::new(client)));

    Controller::new(jobs, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(obj) => tracing::debug!(?obj, "reconciled"),
                Err(e) => tracing::error!(error = ?e, "reconcile failed"),
            }
            std::future::ready(())
        })
        .await;

    Ok(())
}
