//! Model registry.
//!
//! Built once by `RegistryBuilder` at bootstrap, frozen by `finalize`, and
//! read-only afterwards. A finalized registry is `Sync` and is shared by
//! `&'static` reference between environments.

pub(crate) mod base;
mod builder;

pub use builder::{ModelBuilder, RegistryBuilder};

pub(crate) use builder::{CREATE_DATE, DISPLAY_NAME, LAST_UPDATE, WRITE_DATE};

use crate::{
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    model::Model,
};
use indexmap::IndexMap;
use std::sync::OnceLock;
use thiserror::Error as ThisError;

static INSTALLED: OnceLock<Registry> = OnceLock::new();

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    #[error("unknown method '{method}' on model '{model}'")]
    UnknownMethod { model: String, method: String },

    #[error("cyclic field dependency on '{model}.{field}': {cycle}")]
    CyclicFieldDependency {
        model: String,
        field: String,
        cycle: String,
    },

    #[error("model '{0}' already declared")]
    DuplicateModel(String),

    #[error("field '{field}' already declared on model '{model}'")]
    DuplicateField { model: String, field: String },

    #[error("invalid relation '{model}.{field}': {reason}")]
    InvalidRelation {
        model: String,
        field: String,
        reason: String,
    },

    #[error("a registry is already installed")]
    AlreadyInstalled,
}

impl RegistryError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownModel(_) | Self::UnknownField { .. } | Self::UnknownMethod { .. } => {
                ErrorClass::NotFound
            }
            Self::AlreadyInstalled => ErrorClass::Conflict,
            Self::CyclicFieldDependency { .. }
            | Self::DuplicateModel(_)
            | Self::DuplicateField { .. }
            | Self::InvalidRelation { .. } => ErrorClass::InvariantViolation,
        }
    }
}

impl From<RegistryError> for InternalError {
    fn from(err: RegistryError) -> Self {
        Self::with_detail(err.class(), ErrorOrigin::Registry, ErrorDetail::Registry(err))
    }
}

///
/// Registry
///
/// Finalized catalog of models, keyed by name, in declaration order.
///

#[derive(Debug)]
pub struct Registry {
    models: IndexMap<String, Model>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) const fn from_models(models: IndexMap<String, Model>) -> Self {
        Self { models }
    }

    /// Resolve a model by name.
    pub fn get(&self, name: &str) -> Result<&Model, InternalError> {
        self.models
            .get(name)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()).into())
    }

    /// Resolve a model by name, aborting when it is not declared.
    ///
    /// Only for call sites where a missing model is a programming error.
    #[must_use]
    pub fn must_get(&self, name: &str) -> &Model {
        match self.get(name) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Promote to a `'static` reference without claiming the global slot.
    #[must_use]
    pub fn leak(self) -> &'static Self {
        Box::leak(Box::new(self))
    }

    /// Install as the process-wide registry. Fails if one is already installed.
    pub fn install(self) -> Result<&'static Self, InternalError> {
        let models = self.models.len();
        INSTALLED
            .set(self)
            .map_err(|_| RegistryError::AlreadyInstalled)?;
        tracing::info!(models, "registry installed");

        global()
    }
}

/// The process-wide registry installed by `Registry::install`.
pub fn global() -> Result<&'static Registry, InternalError> {
    INSTALLED.get().ok_or_else(|| {
        InternalError::new(
            ErrorClass::NotFound,
            ErrorOrigin::Registry,
            "no registry installed",
        )
    })
}
