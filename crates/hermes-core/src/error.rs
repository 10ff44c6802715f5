/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
