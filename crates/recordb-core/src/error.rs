use crate::{
    collection::CollectionError, config::ConfigError, db::store::StoreError,
    db::transaction::TxError, dispatch::DispatchError, env::access::AccessError,
    registry::RegistryError,
};
use derive_more::Display;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable classification.
/// `detail` carries the typed sub-error when one exists; its variant always
/// corresponds to `origin`.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an error without a typed detail payload.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct an error carrying a typed detail; the message is the detail's
    /// display form.
    pub(crate) fn with_detail(class: ErrorClass, origin: ErrorOrigin, detail: ErrorDetail) -> Self {
        Self {
            class,
            origin,
            message: detail.to_string(),
            detail: Some(detail),
        }
    }

    /// Construct a collection-origin invariant violation.
    pub(crate) fn collection_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Collection,
            message,
        )
    }

    #[must_use]
    pub const fn registry_error(&self) -> Option<&RegistryError> {
        match &self.detail {
            Some(ErrorDetail::Registry(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn collection_error(&self) -> Option<&CollectionError> {
        match &self.detail {
            Some(ErrorDetail::Collection(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn dispatch_error(&self) -> Option<&DispatchError> {
        match &self.detail {
            Some(ErrorDetail::Dispatch(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_security_denied(&self) -> bool {
        matches!(
            self.detail,
            Some(ErrorDetail::Access(AccessError::SecurityDenied { .. }))
        )
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorClass {
    #[display("not_found")]
    NotFound,
    #[display("unsupported")]
    Unsupported,
    #[display("invariant_violation")]
    InvariantViolation,
    #[display("conflict")]
    Conflict,
    #[display("forbidden")]
    Forbidden,
    #[display("invalid_argument")]
    InvalidArgument,
    #[display("internal")]
    Internal,
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorOrigin {
    #[display("registry")]
    Registry,
    #[display("dispatch")]
    Dispatch,
    #[display("collection")]
    Collection,
    #[display("cache")]
    Cache,
    #[display("store")]
    Store,
    #[display("transaction")]
    Transaction,
    #[display("onchange")]
    Onchange,
    #[display("access")]
    Access,
    #[display("config")]
    Config,
}

///
/// ErrorDetail
///
/// Typed detail carried by an `InternalError`.
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Registry(RegistryError),

    #[error("{0}")]
    Collection(CollectionError),

    #[error("{0}")]
    Dispatch(DispatchError),

    #[error("{0}")]
    Access(AccessError),

    #[error("{0}")]
    Store(StoreError),

    #[error("{0}")]
    Transaction(TxError),

    #[error("{0}")]
    Config(ConfigError),
}
