//! Manifest synthesis for TrainingJob child resources.
//!
//! Pure functions producing the discovery endpoint (Service) and the worker
//! group (StatefulSet). Deterministic for identical inputs: all label and
//! resource maps are `BTreeMap`s, so repeated passes serialize
//! byte-identically and diff to a store-level no-op.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec, Toleration, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::TrainingJob;
use crate::error::Error;

/// External port of the discovery endpoint; also the rendezvous master port.
pub const ENDPOINT_PORT: i32 = 80;

/// Container port the rendezvous service listens on.
pub const RENDEZVOUS_PORT: i32 = 5000;

/// Label the platform stamps on each pod of a stateful group with its
/// generated (ordinal-suffixed) name.
const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Topology key for the one-worker-per-host scheduling constraint.
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

const GPU_RESOURCE: &str = "nvidia.com/gpu";
const GPU_COUNT: &str = "4";
const EPHEMERAL_STORAGE_REQUEST: &str = "300Gi";

const SHM_VOLUME: &str = "dshm";
const SHM_MOUNT_PATH: &str = "/dev/shm";

const STORAGE_CLAIM_NAME: &str = "azure-blob-storage";
const STORAGE_CLAIM_SIZE: &str = "5Gi";
const STORAGE_CLASS: &str = "blob-storage";
const STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";
const STORAGE_CLASS_HINT: &str = "azureblob-nfs-premium";

/// The job's `matchLabels`, validated non-empty.
///
/// Both the anti-affinity rule and the endpoint selector need at least one
/// label, so an empty selector is a permanent failure that must surface
/// before any store call.
pub fn validated_labels(job: &TrainingJob) -> Result<&BTreeMap<String, String>, Error> {
    match job
        .spec
        .label_selector
        .as_ref()
        .and_then(|s| s.match_labels.as_ref())
    {
        Some(labels) if !labels.is_empty() => Ok(labels),
        _ => Err(Error::invalid_selector(
            job.name_any(),
            "labelSelector.matchLabels must carry at least one label",
        )),
    }
}

fn child_metadata(job: &TrainingJob) -> Result<ObjectMeta, Error> {
    let owner = job.controller_owner_ref(&()).ok_or(Error::MissingUid)?;
    Ok(ObjectMeta {
        name: Some(job.name_any()),
        namespace: Some(job.namespace().ok_or(Error::MissingNamespace)?),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}

/// Synthesize the discovery endpoint for a job.
///
/// A load-balanced Service whose selector narrows the job's labels to the
/// ordinal-0 pod: the rank-0 worker hosts the rendezvous service, so the
/// endpoint must resolve to it regardless of which pod is ready first.
pub fn endpoint_manifest(job: &TrainingJob) -> Result<Service, Error> {
    let labels = validated_labels(job)?;

    let mut selector = labels.clone();
    selector.insert(POD_NAME_LABEL.to_string(), format!("{}-0", job.name_any()));

    Ok(Service {
        metadata: child_metadata(job)?,
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port: ENDPOINT_PORT,
                target_port: Some(IntOrString::Int(RENDEZVOUS_PORT)),
                ..Default::default()
            }]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Synthesize the worker group for a job.
///
/// A parallel-managed StatefulSet: workers coordinate only at rendezvous
/// time through the discovery endpoint, never on each other's lifecycle
/// order. The pod template carries the rendered launch command; exactly one
/// shared network-backed storage claim is attached regardless of replica
/// count.
pub fn worker_group_manifest(
    job: &TrainingJob,
    command: Vec<String>,
) -> Result<StatefulSet, Error> {
    let labels = validated_labels(job)?;
    let name = job.name_any();

    // One requirement per selector pair: no two workers of this group may
    // colocate on the same host.
    let match_expressions: Vec<LabelSelectorRequirement> = labels
        .iter()
        .map(|(key, value)| LabelSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();

    Ok(StatefulSet {
        metadata: child_metadata(job)?,
        spec: Some(StatefulSetSpec {
            replicas: Some(job.spec.replicas),
            service_name: Some(name.clone()),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(Affinity {
                        pod_anti_affinity: Some(PodAntiAffinity {
                            required_during_scheduling_ignored_during_execution: Some(vec![
                                PodAffinityTerm {
                                    label_selector: Some(LabelSelector {
                                        match_expressions: Some(match_expressions),
                                        ..Default::default()
                                    }),
                                    topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                                    ..Default::default()
                                },
                            ]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    containers: vec![Container {
                        name: name.clone(),
                        image: Some(job.spec.image.clone()),
                        command: Some(command),
                        resources: Some(worker_resources()),
                        ports: Some(vec![ContainerPort {
                            container_port: RENDEZVOUS_PORT,
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: SHM_VOLUME.to_string(),
                            mount_path: SHM_MOUNT_PATH.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    tolerations: Some(gpu_tolerations()),
                    volumes: Some(vec![Volume {
                        name: SHM_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource {
                            medium: Some("Memory".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![storage_claim_template()]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn worker_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([(
            GPU_RESOURCE.to_string(),
            Quantity(GPU_COUNT.to_string()),
        )])),
        requests: Some(BTreeMap::from([
            (GPU_RESOURCE.to_string(), Quantity(GPU_COUNT.to_string())),
            (
                "ephemeral-storage".to_string(),
                Quantity(EPHEMERAL_STORAGE_REQUEST.to_string()),
            ),
        ])),
        ..Default::default()
    }
}

fn gpu_tolerations() -> Vec<Toleration> {
    vec![
        Toleration {
            effect: Some("NoSchedule".to_string()),
            operator: Some("Equal".to_string()),
            key: Some("gpu".to_string()),
            ..Default::default()
        },
        Toleration {
            effect: Some("NoSchedule".to_string()),
            key: Some("sku".to_string()),
            value: Some("gpu".to_string()),
            ..Default::default()
        },
    ]
}

/// The single shared storage claim: a network-backed read-write-many volume
/// mounted by every worker, not per-pod local storage.
fn storage_claim_template() -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(STORAGE_CLAIM_NAME.to_string()),
            annotations: Some(BTreeMap::from([(
                STORAGE_CLASS_ANNOTATION.to_string(),
                STORAGE_CLASS_HINT.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(STORAGE_CLASS.to_string()),
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(STORAGE_CLAIM_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
