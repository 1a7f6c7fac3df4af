use axum::{
    extract::Extension,
    response::IntoResponse,
    routing::post,
    Router,
    Json,
};
use std::sync::Arc;
use kube::core::{admission::{AdmissionRequest, AdmissionResponse, AdmissionReview}, DynamicObject};

use duck_operator_common::state::State;

use crate::admission::duck_type::{default_duck_type_crd, validate_duck_type_crd};

pub fn router() -> Router {
    Router::new()
        .route("/duck.reconciler.io/ducktype/validate", post(validate_duck_type_endpoint))
        .route("/duck.reconciler.io/ducktype/default", post(default_duck_type_endpoint))
}

async fn validate_duck_type_endpoint(Extension(_state): Extension<Arc<State>>, payload: Json<AdmissionReview<DynamicObject>>) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match payload.0.try_into() {
        Ok(request) => request,
        Err(err) => {
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };
    // Defaults to allow
    let mut response = AdmissionResponse::from(&request);

    // Enforce the DuckType name and spec invariants, and deny on violation
    if let Some(object) = &request.object {
        if let Err(err) = validate_duck_type_crd(object) {
            response = response.deny(err.to_string());
        }
    }

    // Convert the response to a review and return it
    Json(response.into_review())
}

async fn default_duck_type_endpoint(Extension(_state): Extension<Arc<State>>, payload: Json<AdmissionReview<DynamicObject>>) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match payload.0.try_into() {
        Ok(request) => request,
        Err(err) => {
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };
    let mut response = AdmissionResponse::from(&request);

    // Fill the defaulted names through a JSON patch
    if let Some(object) = &request.object {
        match default_duck_type_crd(object) {
            Ok(Some(patch)) => match response.with_patch(patch) {
                Ok(patched) => response = patched,
                Err(err) => response = AdmissionResponse::invalid(err.to_string()),
            },
            Ok(None) => (),
            Err(err) => {
                response = response.deny(err.to_string());
            }
        }
    }

    Json(response.into_review())
}
