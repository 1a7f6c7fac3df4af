use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuckClientError {
    #[error("unknown duck type")]
    UnknownDuckType,
    #[error("duck type is not ready")]
    DuckTypeNotReady,
    #[error("unknown duck")]
    UnknownDuck,
    #[error("referenced apiVersion kind is not a duck")]
    NotADuck,
    #[error("missing object key: {0}")]
    MissingObjectKeyError(&'static str),
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("conversion error: {0}")]
    ConversionError(#[from] serde_json::Error),
}

pub type Result<T> = result::Result<T, DuckClientError>;
