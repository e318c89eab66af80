use thiserror::Error;

/// Failures reported by a [`ResourceStore`](crate::store::ResourceStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The object changed since it was read.
    #[error("conflict writing {kind} '{namespace}/{name}': {message}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("{kind} '{namespace}/{name}': {source}")]
    Api {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl StoreError {
    /// Sorts a client error into not-found, conflict or everything else.
    pub fn from_kube(kind: &'static str, namespace: &str, name: &str, err: kube::Error) -> Self {
        let namespace = namespace.to_owned();
        let name = name.to_owned();
        match err {
            kube::Error::Api(e) if e.code == 404 => StoreError::NotFound {
                kind,
                namespace,
                name,
            },
            kube::Error::Api(e) if e.code == 409 => StoreError::Conflict {
                kind,
                namespace,
                name,
                message: e.message,
            },
            source => StoreError::Api {
                kind,
                namespace,
                name,
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Reasons a reference repair did not complete.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gave up after {attempts} conflicting updates: {source}")]
    ConflictRetriesExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("reconciliation cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("maxUpdateAttempts must be at least 1")]
    NoAttempts,

    #[error("resyncSeconds must be greater than zero when set")]
    ZeroResync,
}
