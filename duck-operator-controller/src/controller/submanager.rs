use std::collections::HashMap;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use duck_operator_common::constant::FINALIZER;
use duck_operator_common::telemetry::{info, warn};

use crate::crd::v1::duck::GroupKind;
use crate::error::{ControllerError, Result};

/// A nested controller manager scoped to one DuckType. It borrows the host's
/// client but only serves APIs for the local kinds it was created with, so
/// inner reconcilers cannot quietly reach the rest of the cluster.
pub struct SubManager {
    client: Client,
    sync_period: Duration,
    local_types: Vec<GroupKind>,
    runnables: Vec<BoxFuture<'static, Result<()>>>,
}

impl SubManager {
    fn new(client: Client, sync_period: Duration, local_types: Vec<GroupKind>) -> Self {
        SubManager {
            client,
            sync_period,
            local_types,
            runnables: vec![],
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn sync_period(&self) -> Duration {
        self.sync_period
    }

    /// A dynamic API for one of the manager's local kinds. Kinds outside the
    /// local list are refused rather than silently proxied to the cluster.
    pub fn local_api(&self, resource: &ApiResource) -> Result<Api<DynamicObject>> {
        let local = self
            .local_types
            .iter()
            .any(|gk| gk.group == resource.group && gk.kind == resource.kind);
        if !local {
            return Err(ControllerError::NotLocalError {
                group: resource.group.clone(),
                kind: resource.kind.clone(),
            });
        }
        Ok(Api::all_with(self.client.clone(), resource))
    }

    /// Register a runnable driven for the lifetime of the manager. Runnables
    /// are expected to stop when the cancellation token handed to setup fires.
    pub fn add(&mut self, runnable: impl Future<Output = Result<()>> + Send + 'static) {
        self.runnables.push(runnable.boxed());
    }

    async fn run(self) -> Result<()> {
        try_join_all(self.runnables).await.map(|_| ())
    }
}

struct SubManagerEntry {
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<Result<()>>>,
}

/// Registry of running sub-managers, at most one per live DuckType UID.
pub struct SubManagerSet {
    client: Client,
    sync_period: Duration,
    managers: Mutex<HashMap<String, SubManagerEntry>>,
}

impl SubManagerSet {
    pub fn new(client: Client, sync_period: Duration) -> Self {
        SubManagerSet {
            client,
            sync_period,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Drive the sub-manager for a resource: lazily start it on the first
    /// non-deleting reconcile, no-op while it is running, and cancel and
    /// drain it when the resource is being deleted. A live resource missing
    /// the finalizer is refused loudly.
    pub async fn reconcile<K, F>(&self, resource: &K, local_types: Vec<GroupKind>, setup: F) -> Result<()>
    where
        K: Resource,
        F: FnOnce(&mut SubManager, &CancellationToken) -> Result<()>,
    {
        let uid = resource
            .uid()
            .ok_or(ControllerError::MissingObjectKeyError("metadata.uid"))?;

        if resource.meta().deletion_timestamp.is_some() {
            return self.shutdown(&uid).await;
        }

        if !resource.finalizers().iter().any(|f| f == FINALIZER) {
            return Err(ControllerError::MissingFinalizerError(FINALIZER.to_string()));
        }

        if self.managers.lock().contains_key(&uid) {
            // already running
            return Ok(());
        }

        self.start(uid, resource.name_any(), local_types, setup)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.managers.lock().contains_key(uid)
    }

    fn start<F>(&self, uid: String, name: String, local_types: Vec<GroupKind>, setup: F) -> Result<()>
    where
        F: FnOnce(&mut SubManager, &CancellationToken) -> Result<()>,
    {
        let mut manager = SubManager::new(self.client.clone(), self.sync_period, local_types);
        let cancel = CancellationToken::new();

        if let Err(err) = setup(&mut manager, &cancel) {
            // nothing has been spawned yet; firing the token tears down
            // anything setup wired to it before failing
            cancel.cancel();
            return Err(err);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.managers.lock().insert(
            uid,
            SubManagerEntry {
                cancel,
                done: Some(done_rx),
            },
        );

        info!(event = "SubManagerStarted", duck_type = name.as_str());
        tokio::spawn(async move {
            let result = manager.run().await;
            let _ = done_tx.send(result);
        });

        Ok(())
    }

    /// Cancel the entry's sub-manager, block until it has completed, then
    /// drop the entry. Errors from the terminating manager are logged and
    /// swallowed.
    async fn shutdown(&self, uid: &str) -> Result<()> {
        let (cancel, done) = {
            let mut managers = self.managers.lock();
            match managers.get_mut(uid) {
                Some(entry) => (entry.cancel.clone(), entry.done.take()),
                None => return Ok(()),
            }
        };

        cancel.cancel();
        if let Some(done) = done {
            if let Ok(Err(err)) = done.await {
                warn!(event = "SubManagerError", error = %err);
            }
        }
        self.managers.lock().remove(uid);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use kube::core::GroupVersionKind;

    use crate::crd::v1::duck_type::{DuckType, DuckTypeSpec};

    fn test_client() -> Client {
        let service = tower::service_fn(|_req: http::Request<kube::client::Body>| async {
            Ok::<_, std::convert::Infallible>(
                http::Response::builder()
                    .status(404)
                    .body(kube::client::Body::empty())
                    .unwrap(),
            )
        });
        Client::new(service, "default")
    }

    fn duck_type(uid: &str, finalized: bool, deleting: bool) -> DuckType {
        let mut duck_type = DuckType::new(
            "ducks.example.com",
            DuckTypeSpec {
                group: "example.com".to_string(),
                plural: "ducks".to_string(),
                singular: None,
                kind: "Duck".to_string(),
                list_kind: None,
            },
        );
        duck_type.metadata.uid = Some(uid.to_string());
        if finalized {
            duck_type.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        if deleting {
            duck_type.metadata.deletion_timestamp =
                Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                    chrono::Utc::now(),
                ));
        }
        duck_type
    }

    fn local_types() -> Vec<GroupKind> {
        vec![
            GroupKind::new("example.com", "Duck"),
            GroupKind::new("example.com", "DuckList"),
        ]
    }

    #[tokio::test]
    async fn local_api_refuses_foreign_kinds() {
        let manager = SubManager::new(test_client(), Duration::from_secs(1), local_types());

        let duck = ApiResource::from_gvk(&GroupVersionKind {
            group: "example.com".to_string(),
            version: "v1".to_string(),
            kind: "Duck".to_string(),
        });
        assert!(manager.local_api(&duck).is_ok());

        let deployment = ApiResource::from_gvk(&GroupVersionKind {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
        });
        let err = manager.local_api(&deployment).unwrap_err();
        assert!(matches!(err, ControllerError::NotLocalError { .. }));
    }

    #[tokio::test]
    async fn starts_once_per_uid() {
        let set = SubManagerSet::new(test_client(), Duration::from_secs(1));
        let resource = duck_type("uid-1", true, false);
        let setups = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let setups = setups.clone();
            set.reconcile(&resource, local_types(), |manager, cancel| {
                setups.fetch_add(1, Ordering::SeqCst);
                let cancel = cancel.clone();
                manager.add(async move {
                    cancel.cancelled().await;
                    Ok(())
                });
                Ok(())
            })
            .await
            .unwrap();
        }

        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert!(set.contains("uid-1"));
    }

    #[tokio::test]
    async fn refuses_resource_missing_finalizer() {
        let set = SubManagerSet::new(test_client(), Duration::from_secs(1));
        let resource = duck_type("uid-1", false, false);

        let err = set
            .reconcile(&resource, local_types(), |_, _| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::MissingFinalizerError(_)));
        assert!(!set.contains("uid-1"));
    }

    #[tokio::test]
    async fn setup_error_cancels_and_leaves_no_entry() {
        let set = SubManagerSet::new(test_client(), Duration::from_secs(1));
        let resource = duck_type("uid-1", true, false);
        let observed = Arc::new(Mutex::new(None::<CancellationToken>));

        let result = {
            let observed = observed.clone();
            set.reconcile(&resource, local_types(), |_, cancel| {
                *observed.lock() = Some(cancel.clone());
                Err(ControllerError::SetupError("boom".to_string()))
            })
            .await
        };

        assert!(matches!(result, Err(ControllerError::SetupError(_))));
        assert!(!set.contains("uid-1"));
        assert!(observed.lock().as_ref().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn deletion_cancels_and_drains() {
        let set = SubManagerSet::new(test_client(), Duration::from_secs(1));
        let live = duck_type("uid-1", true, false);
        let stopped = Arc::new(AtomicUsize::new(0));

        {
            let stopped = stopped.clone();
            set.reconcile(&live, local_types(), |manager, cancel| {
                let cancel = cancel.clone();
                manager.add(async move {
                    cancel.cancelled().await;
                    stopped.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            })
            .await
            .unwrap();
        }

        let deleting = duck_type("uid-1", true, true);
        set.reconcile(&deleting, vec![], |_, _| Ok(())).await.unwrap();

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!set.contains("uid-1"));

        // a second deletion reconcile is a no-op
        set.reconcile(&deleting, vec![], |_, _| Ok(())).await.unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
