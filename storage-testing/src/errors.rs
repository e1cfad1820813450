use storage_graph::{ConfigError, DocumentError, RegistryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("spec not found for '{spec_name}' in resources/lab-specs")]
    SpecNotFound { spec_name: String },
    #[error("invalid spec '{spec_name}': {reason}")]
    SpecInvalid { spec_name: String, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("type registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("no device matches '{pattern}'")]
    NoDeviceSelected { pattern: String },
}

pub type Result<T> = std::result::Result<T, TestingError>;
