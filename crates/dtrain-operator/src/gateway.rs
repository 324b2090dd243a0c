//! Resource gateway: retried fetch/create against the cluster store.
//!
//! The reconciler never talks to the Kubernetes API directly; it goes
//! through [`StoreGateway`], which makes passes testable with an in-memory
//! store and keeps the transient-retry policy in one place.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::PostParams;
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::Error;
use crate::retry::{RetryConfig, retry_on};

/// Outcome of a create call against the cluster store.
///
/// `AlreadyExists` is not an error: store-level uniqueness is the safety net
/// against duplicate creation from overlapping passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Read/create access to the cluster store for the reconciler.
///
/// `fetch_*` returns `Ok(None)` for NotFound — expected, it drives the
/// create branch. Implementations retry transient failures internally;
/// permanent errors propagate immediately.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn fetch_endpoint(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    async fn create_endpoint(&self, endpoint: &Service) -> Result<CreateOutcome, Error>;

    async fn fetch_worker_group(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    async fn create_worker_group(&self, group: &StatefulSet) -> Result<CreateOutcome, Error>;
}

/// Whether a store error is worth retrying.
///
/// 429 and 5xx API statuses are throttling or server trouble; anything that
/// is not an API status at all is a connection-level failure. The remaining
/// API statuses (conflict, not-found, validation) are permanent for this
/// pass.
pub(crate) fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
        _ => true,
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Gateway backed by the real Kubernetes API.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    retry: RetryConfig,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    async fn fetch<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "fetching resource");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let fetched = retry_on(&self.retry, "fetch", is_transient, || api.get_opt(name)).await?;
        Ok(fetched)
    }

    async fn create<K>(&self, resource: &K) -> Result<CreateOutcome, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let namespace = resource
            .meta()
            .namespace
            .as_deref()
            .ok_or(Error::MissingNamespace)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams::default();

        let outcome = retry_on(&self.retry, "create", is_transient, || {
            api.create(&params, resource)
        })
        .await;

        match outcome {
            Ok(created) => {
                info!(
                    kind = %K::kind(&()),
                    name = ?created.meta().name,
                    namespace = %namespace,
                    "created resource"
                );
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_conflict(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StoreGateway for KubeGateway {
    async fn fetch_endpoint(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        self.fetch(name, namespace).await
    }

    async fn create_endpoint(&self, endpoint: &Service) -> Result<CreateOutcome, Error> {
        self.create(endpoint).await
    }

    async fn fetch_worker_group(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        self.fetch(name, namespace).await
    }

    async fn create_worker_group(&self, group: &StatefulSet) -> Result<CreateOutcome, Error> {
        self.create(group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::Status;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        let mut status = Status::failure(&format!("{reason} ({code})"), reason);
        status.code = code;
        kube::Error::Api(Box::new(status))
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(is_transient(&api_error(429, "TooManyRequests")));
        assert!(is_transient(&api_error(500, "InternalError")));
        assert!(is_transient(&api_error(503, "ServiceUnavailable")));
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!is_transient(&api_error(404, "NotFound")));
        assert!(!is_transient(&api_error(409, "AlreadyExists")));
        assert!(!is_transient(&api_error(422, "Invalid")));
    }

    #[test]
    fn conflict_detection() {
        assert!(is_conflict(&api_error(409, "AlreadyExists")));
        assert!(!is_conflict(&api_error(404, "NotFound")));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig {
            initial_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        };

        let result: Result<u32, kube::Error> =
            retry_on(&config, "fetch", is_transient, || {
                let c = c.clone();
                async move {
                    match c.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(api_error(503, "ServiceUnavailable")),
                        1 => Err(api_error(429, "TooManyRequests")),
                        n => Ok(n),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_api_error_stops_after_one_attempt() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), kube::Error> =
            retry_on(&RetryConfig::default(), "create", is_transient, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(409, "AlreadyExists"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
