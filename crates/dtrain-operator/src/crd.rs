//! TrainingJob custom resource types

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declarative shape of a distributed training job.
///
/// `replicas` is the number of worker pods (one per distributed node) and
/// `processes_per_node` the number of training processes each worker
/// launches. The label selector must carry at least one `matchLabels` entry
/// and uniquely identify the pods of this job: it drives both the discovery
/// endpoint selector and the anti-affinity rule that spreads workers across
/// hosts.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dtrain.dev",
    version = "v1",
    kind = "TrainingJob",
    plural = "trainingjobs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobSpec {
    /// Number of worker pods, one per distributed node
    #[schemars(range(min = 1))]
    pub replicas: i32,

    /// Training processes launched per worker pod
    #[schemars(range(min = 1))]
    pub processes_per_node: i32,

    /// Container image running the training workload
    pub image: String,

    /// Labels uniquely identifying the pods of this job
    pub label_selector: Option<LabelSelector>,
}
