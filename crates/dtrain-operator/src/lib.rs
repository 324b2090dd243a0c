//! dtrain — a Kubernetes operator for distributed training jobs.
//!
//! A `TrainingJob` declares the desired runtime topology of a torchrun
//! workload: how many worker pods, how many processes per worker, which
//! image, and the labels that identify the job's pods. The operator
//! converges the cluster toward that declaration by provisioning two child
//! resources — a load-balanced discovery endpoint pinned to the rank-0 pod
//! and a parallel-managed StatefulSet of workers — and by rendering the
//! launch command each worker uses to discover its rank, its peers, and the
//! rendezvous address.

pub mod command;
pub mod controller;
pub mod crd;
pub mod error;
pub mod gateway;
pub mod manifests;
pub mod retry;

pub use error::Error;
