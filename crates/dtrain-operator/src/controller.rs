//! TrainingJob reconciliation.
//!
//! Convergence state is re-derived on every pass by probing the cluster
//! store; the controller holds no per-object state between passes, which
//! keeps it restart-tolerant:
//!
//! EndpointMissing → AddressPending → WorkerGroupMissing → Converged
//!
//! The endpoint step is strictly ordered before the worker-group step: the
//! launch command needs the endpoint's externally assigned address, and the
//! worker group is never created from an unassigned one.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{error, info};

use crate::command::{self, TorchRunParams};
use crate::crd::TrainingJob;
use crate::error::Error;
use crate::gateway::{CreateOutcome, StoreGateway};
use crate::manifests;

/// Fixed revisit delay for failed or still-converging passes.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Shared context for the TrainingJob controller.
///
/// Generic over the store gateway so passes can run against an in-memory
/// store in tests.
pub struct Context<G> {
    pub gateway: G,
}

impl<G> Context<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }
}

/// Observed convergence state of a job, re-derived every pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConvergeState {
    /// No discovery endpoint yet
    EndpointMissing,
    /// Endpoint exists but its external address is not assigned yet
    AddressPending,
    /// Endpoint addressable, worker group not created yet
    WorkerGroupMissing { address: String },
    /// Both children exist; nothing left to do
    Converged,
}

pub(crate) fn classify(
    endpoint: Option<&Service>,
    worker_group: Option<&StatefulSet>,
) -> ConvergeState {
    let Some(endpoint) = endpoint else {
        return ConvergeState::EndpointMissing;
    };
    // Both children present is terminal; the address only matters while the
    // worker group still has to be created.
    if worker_group.is_some() {
        return ConvergeState::Converged;
    }
    match endpoint_address(endpoint) {
        Some(address) => ConvergeState::WorkerGroupMissing { address },
        None => ConvergeState::AddressPending,
    }
}

/// The externally assigned rendezvous address, once the platform has
/// provisioned the load balancer.
fn endpoint_address(endpoint: &Service) -> Option<String> {
    let ingress = endpoint
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first());
    if let Some(ingress) = ingress {
        if let Some(ip) = &ingress.ip {
            return Some(ip.clone());
        }
        if let Some(hostname) = &ingress.hostname {
            return Some(hostname.clone());
        }
    }
    endpoint.spec.as_ref().and_then(|s| s.load_balancer_ip.clone())
}

/// One convergence pass over a TrainingJob.
///
/// Ensures the discovery endpoint, then the worker group. Existing children
/// are never mutated; re-running a pass on a converged job performs no
/// writes.
pub async fn reconcile<G: StoreGateway>(
    job: Arc<TrainingJob>,
    ctx: Arc<Context<G>>,
) -> Result<Action, Error> {
    // Malformed input must fail before any store call
    manifests::validated_labels(&job)?;

    let name = job.name_any();
    let namespace = job.namespace().ok_or(Error::MissingNamespace)?;

    info!(job = %name, namespace = %namespace, "reconciling TrainingJob");

    let endpoint = ctx.gateway.fetch_endpoint(&name, &namespace).await?;
    let worker_group = ctx.gateway.fetch_worker_group(&name, &namespace).await?;

    match classify(endpoint.as_ref(), worker_group.as_ref()) {
        ConvergeState::EndpointMissing => {
            let manifest = manifests::endpoint_manifest(&job)?;
            match ctx.gateway.create_endpoint(&manifest).await? {
                CreateOutcome::Created => info!(job = %name, "created discovery endpoint"),
                CreateOutcome::AlreadyExists => {
                    info!(job = %name, "discovery endpoint already exists")
                }
            }
            // The load balancer address is assigned asynchronously
            Ok(Action::requeue(REQUEUE_DELAY))
        }
        ConvergeState::AddressPending => {
            info!(job = %name, "rendezvous address not yet assigned, waiting");
            Ok(Action::requeue(REQUEUE_DELAY))
        }
        ConvergeState::WorkerGroupMissing { address } => {
            let params = TorchRunParams::for_job(&job.spec, &address);
            let launch = command::build_command(command::TORCHRUN_BASE, &params);
            let manifest = manifests::worker_group_manifest(&job, launch)?;
            match ctx.gateway.create_worker_group(&manifest).await? {
                CreateOutcome::Created => {
                    info!(
                        job = %name,
                        replicas = job.spec.replicas,
                        rendezvous = %address,
                        "created worker group"
                    )
                }
                CreateOutcome::AlreadyExists => info!(job = %name, "worker group already exists"),
            }
            Ok(Action::await_change())
        }
        ConvergeState::Converged => Ok(Action::await_change()),
    }
}

/// Error policy: report the failed pass and revisit after the fixed delay.
/// Whole-pass retry belongs to the control-loop runtime, not to us.
pub fn error_policy<G: StoreGateway>(
    job: Arc<TrainingJob>,
    error: &Error,
    _ctx: Arc<Context<G>>,
) -> Action {
    error!(job = %job.name_any(), %error, "reconciliation failed");
    Action::requeue(REQUEUE_DELAY)
}
