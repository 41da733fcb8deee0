use derive_more::Display;
use recordb_core::{
    collection::CollectionError,
    error::{ErrorClass, ErrorDetail, ErrorOrigin as CoreErrorOrigin, InternalError},
    registry::RegistryError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let kind = ErrorKind::of(&err);

        Self::new(kind, err.origin.into(), err.message)
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    UnknownModel,
    UnknownField,
    UnknownMethod,
    ModelMismatch,

    /// Raised while finalizing the registry; startup cannot continue.
    CyclicFieldDependency,

    RecordNotFound,

    /// Denied by the access policy. Never masked.
    SecurityDenied,

    /// Malformed arguments, non-singleton receivers, or writes to computed
    /// fields.
    InvalidArgument,

    /// Storage or transaction failure.
    Store,

    /// The caller cannot remediate this.
    Internal,
}

impl ErrorKind {
    fn of(err: &InternalError) -> Self {
        match &err.detail {
            Some(ErrorDetail::Registry(registry)) => match registry {
                RegistryError::UnknownModel(_) => Self::UnknownModel,
                RegistryError::UnknownField { .. } => Self::UnknownField,
                RegistryError::UnknownMethod { .. } => Self::UnknownMethod,
                RegistryError::CyclicFieldDependency { .. } => Self::CyclicFieldDependency,
                _ => Self::Internal,
            },
            Some(ErrorDetail::Collection(collection)) => match collection {
                CollectionError::ModelMismatch { .. } => Self::ModelMismatch,
                CollectionError::RecordNotFound { .. } => Self::RecordNotFound,
                CollectionError::NotSingleton { .. } => Self::InvalidArgument,
            },
            Some(ErrorDetail::Access(_)) => Self::SecurityDenied,
            Some(ErrorDetail::Store(_) | ErrorDetail::Transaction(_)) => Self::Store,
            Some(ErrorDetail::Dispatch(_) | ErrorDetail::Config(_)) | None => match err.class {
                ErrorClass::InvalidArgument => Self::InvalidArgument,
                ErrorClass::Forbidden => Self::SecurityDenied,
                _ => Self::Internal,
            },
        }
    }
}

///
/// ErrorOrigin
/// Public origin taxonomy: the layer that raised the error.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Registry,
    Dispatch,
    Collection,
    Cache,
    Store,
    Transaction,
    Onchange,
    Access,
    Config,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Registry => Self::Registry,
            CoreErrorOrigin::Dispatch => Self::Dispatch,
            CoreErrorOrigin::Collection => Self::Collection,
            CoreErrorOrigin::Cache => Self::Cache,
            CoreErrorOrigin::Store => Self::Store,
            CoreErrorOrigin::Transaction => Self::Transaction,
            CoreErrorOrigin::Onchange => Self::Onchange,
            CoreErrorOrigin::Access => Self::Access,
            CoreErrorOrigin::Config => Self::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recordb_core::error::ErrorOrigin as Origin;

    #[test]
    fn registry_details_map_to_named_kinds() {
        let err: Error = InternalError::from(RegistryError::UnknownMethod {
            model: "User".to_string(),
            method: "Archive".to_string(),
        })
        .into();

        assert_eq!(err.kind, ErrorKind::UnknownMethod);
        assert_eq!(err.origin, ErrorOrigin::Registry);
        assert!(err.message.contains("Archive"));
    }

    #[test]
    fn untyped_errors_fall_back_on_class() {
        let invalid: Error =
            InternalError::new(ErrorClass::InvalidArgument, Origin::Collection, "bad value").into();
        let internal: Error =
            InternalError::new(ErrorClass::InvariantViolation, Origin::Cache, "stale").into();

        assert_eq!(invalid.kind, ErrorKind::InvalidArgument);
        assert_eq!(internal.kind, ErrorKind::Internal);
        assert_eq!(internal.origin, ErrorOrigin::Cache);
    }

    #[test]
    fn error_serializes_with_kind_and_origin() {
        let err = Error::new(ErrorKind::RecordNotFound, ErrorOrigin::Collection, "gone");

        let json = serde_json::to_string(&err).expect("error should serialize");

        assert_eq!(
            json,
            r#"{"kind":"RecordNotFound","origin":"Collection","message":"gone"}"#
        );
    }
}
