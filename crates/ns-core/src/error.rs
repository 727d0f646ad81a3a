use thiserror::Error;

/// Errors produced while building, applying or parsing transactions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NftError {
    /// Malformed object for the requested verb. Raised at transaction-build time.
    #[error("invalid {object}: {message}")]
    Validation { object: String, message: String },

    /// A referenced object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// `create` collided with an existing object
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed dump text
    #[error("parsing line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Verb is not supported for the object kind
    #[error("unhandled operation {verb:?} on {kind}")]
    UnhandledOperation { verb: String, kind: String },
}

pub type Result<T> = std::result::Result<T, NftError>;

impl NftError {
    pub fn validation(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Reports whether `err` (or anything it wraps) is a NotFound error
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<NftError>())
        .any(NftError::is_not_found)
}

/// Reports whether `err` (or anything it wraps) is an AlreadyExists error
pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<NftError>())
        .any(NftError::is_already_exists)
}
