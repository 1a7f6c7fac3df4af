// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("failed to create client: {0}")]
    KubeError(#[from] kube::Error),
    #[error("missing object key: {0}")]
    MissingObjectKeyError(&'static str),
    #[error("finalizer error: {0}")]
    FinalizerError(String),
    #[error("resource must contain finalizer {0:?}")]
    MissingFinalizerError(String),
    #[error("sub-manager setup error: {0}")]
    SetupError(String),
    #[error("kind {kind}.{group} is not local to this sub-manager")]
    NotLocalError { group: String, kind: String },
    #[error("malformed resource: {0}")]
    MalformedResourceError(#[from] serde_json::Error),
    #[error("unknown error: {0}")]
    UnknownError(String),
}

pub type Result<T> = result::Result<T, ControllerError>;
