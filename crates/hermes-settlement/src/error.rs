use hermes_core::{CoreError, Identity};

/// Failure reported by an external collaborator (chain reader, promise store,
/// registration oracle, transactor, history store).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// The collaborator could not be reached or failed to answer.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Settler errors. Identity-scoped variants always carry the identity.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("could not get channel for {identity}: {source}")]
    Channel {
        identity: Identity,
        #[source]
        source: ExternalError,
    },

    #[error("could not get promise for {identity}: {source}")]
    Promise {
        identity: Identity,
        #[source]
        source: ExternalError,
    },

    #[error("could not check registration for {identity}: {source}")]
    Registration {
        identity: Identity,
        #[source]
        source: ExternalError,
    },

    #[error("identity not registered: {0}")]
    NotRegistered(Identity),

    #[error("settlement already in progress for {0}")]
    SettleInProgress(Identity),

    #[error("nothing to settle for {0}")]
    NothingToSettle(Identity),

    #[error("settlement for {identity} failed after {attempts} attempts: {source}")]
    Submission {
        identity: Identity,
        attempts: u32,
        #[source]
        source: ExternalError,
    },

    #[error("could not store settlement history for {identity}: {source}")]
    History {
        identity: Identity,
        #[source]
        source: ExternalError,
    },

    #[error("settle queue closed")]
    QueueClosed,

    #[error("settler already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] CoreError),
}
