use kube::{
    api::{Api, Patch, PatchParams}, runtime::controller::Action, Client, Resource
};
use std::sync::Arc;
use std::fmt::Debug;
use tokio::time::Duration;
use serde::Serialize;
use serde::de::DeserializeOwned;

use duck_operator_common::telemetry::error;

use crate::error::{ControllerError, Result};

pub static FIELD_MANAGER: &str = "ducks.reconciler.io";


/// Create a new kube client by inferring the kubeconfig from the environment
/// or the default service account
///
/// # Returns
/// A Result containing the kube Client or an error
pub async fn create_k8s_client() -> Result<Client> {
    Client::try_default().await.map_err(ControllerError::from)
}

/// Error policy to log the error and requeue the object after 30 seconds
///
/// # Arguments
/// * `_object`: The object that caused the error
/// * `_error`: The error that occurred
/// * `_ctx`: The context of the controller
///
/// # Returns
/// An Action to requeue the object after 30 seconds
pub fn error_policy<T, C>(_object: Arc<T>, _error: &ControllerError, _ctx: Arc<C>) -> Action {
    error!(
        event = "Error",
        error = %_error,
    );
    Action::requeue(Duration::from_secs(30))
}

/// Apply a Resource to the cluster
///
/// # Arguments
/// * `api`: The API client for the resource type
/// * `obj`: The object to apply
/// * `name`: The name of the object
///
/// # Returns
/// A Result containing the applied object or an error
pub async fn apply<T>(api: &Api<T>, obj: T, name: &str) -> Result<T>
where
    T: Clone + Debug + Serialize + DeserializeOwned + Resource<DynamicType = ()>,
{
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Apply(obj),
    ).await.map_err(ControllerError::from)
}

/// Delete a Resource, tolerating objects that are already gone
///
/// # Arguments
/// * `api`: The API client for the resource type
/// * `name`: The name of the object to delete
///
/// # Returns
/// A Result indicating success or an error
pub async fn delete<T>(api: &Api<T>, name: &str) -> Result<()>
where
    T: Clone + Debug + DeserializeOwned + Resource<DynamicType = ()>,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(ControllerError::from(e)),
    }
}

/// The API machinery reason carried by an error, if it is an API error
pub fn api_error_reason(err: &ControllerError) -> Option<&str> {
    match err {
        ControllerError::KubeError(kube::Error::Api(e)) => Some(e.reason.as_str()),
        _ => None,
    }
}

/// The API machinery message carried by an error, if it is an API error
pub fn api_error_message(err: &ControllerError) -> String {
    match err {
        ControllerError::KubeError(kube::Error::Api(e)) => e.message.clone(),
        _ => String::new(),
    }
}
