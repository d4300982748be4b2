//! Error type shared by the database manager and the session controller.

use uuid::Uuid;

/// Errors surfaced to callers of the session and the database manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is locked; the operation needs an unlocked database.
    #[error("the database is locked")]
    Locked,

    /// The session was shut down and can no longer be used.
    #[error("the session has been destroyed")]
    Destroyed,

    /// The supplied password does not unlock the database.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No group or entry with this UUID exists in the database.
    #[error("element {0} not found")]
    NotFound(Uuid),

    /// The root group cannot be deleted.
    #[error("operation not permitted on the root group")]
    RootGroup,

    /// The operation needs an entry but was given a group.
    #[error("{0} is not an entry")]
    NotAnEntry(Uuid),

    /// The displayed entry has no attachment with this name.
    #[error("attachment {0:?} not found")]
    AttachmentNotFound(String),

    /// A save is already running.
    #[error("a save is already in progress")]
    SaveInProgress,

    /// Failure reported by the underlying KeePass database.
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
