use crate::ids::IdError;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("inconsistent catalog: {0}")]
    Inconsistent(String),
    #[error("transaction failed: {0}")]
    TransactionFailure(String),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("id generation failed: {0}")]
    Identity(#[from] IdError),
}

impl CatalogError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Inconsistent(_) => "inconsistent",
            CatalogError::TransactionFailure(_) => "transaction_failure",
            CatalogError::Invalid(_) => "invalid",
            CatalogError::Identity(_) => "identity",
        }
    }
}
