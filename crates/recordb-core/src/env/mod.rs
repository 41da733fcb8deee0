//! Per-operation execution context.
//!
//! An `Environment` bundles the principal, the transaction and the value
//! cache. Environments derived with `with_context`, `with_principal` or
//! `sudo` share the transaction and cache of their origin; `simulate` runs
//! in a nested transaction with a fresh cache that is always discarded.

pub mod access;
pub mod cache;

use crate::{
    collection::RecordCollection,
    config::RuntimeConfig,
    db::Transaction,
    dispatch::Payload,
    env::{
        access::{AccessOp, AccessPolicy},
        cache::Cache,
    },
    error::InternalError,
    registry::Registry,
    value::{FieldMap, Value},
};
use std::{
    cell::{RefCell, RefMut},
    fmt,
    rc::Rc,
    sync::Arc,
};

/// Context key prefix overriding a field's default: `default_<Field>`.
pub const DEFAULT_CONTEXT_PREFIX: &str = "default_";

///
/// Environment
///

#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvInner>,
}

struct EnvInner {
    registry: &'static Registry,
    config: Arc<RuntimeConfig>,
    policy: Arc<dyn AccessPolicy>,
    uid: u64,
    tx: Transaction,
    cache: Rc<RefCell<Cache>>,
    context: FieldMap,
}

impl Environment {
    pub(crate) fn new(
        registry: &'static Registry,
        config: Arc<RuntimeConfig>,
        policy: Arc<dyn AccessPolicy>,
        uid: u64,
        tx: Transaction,
    ) -> Self {
        Self {
            inner: Rc::new(EnvInner {
                registry,
                config,
                policy,
                uid,
                tx,
                cache: Rc::new(RefCell::new(Cache::new())),
                context: FieldMap::new(),
            }),
        }
    }

    fn derive(&self, uid: u64, context: FieldMap) -> Self {
        Self {
            inner: Rc::new(EnvInner {
                registry: self.inner.registry,
                config: Arc::clone(&self.inner.config),
                policy: Arc::clone(&self.inner.policy),
                uid,
                tx: self.inner.tx.clone(),
                cache: Rc::clone(&self.inner.cache),
                context,
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    #[must_use]
    pub fn registry(&self) -> &'static Registry {
        self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn context(&self) -> &FieldMap {
        &self.inner.context
    }

    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.inner.tx
    }

    #[must_use]
    pub fn is_superuser(&self) -> bool {
        self.inner.uid == self.inner.config.superuser_id
    }

    pub(crate) fn cache(&self) -> RefMut<'_, Cache> {
        self.inner.cache.borrow_mut()
    }

    // ---------------------------------------------------------------------
    // Derived environments
    // ---------------------------------------------------------------------

    /// Same principal and transaction, with `key` set in the context.
    #[must_use]
    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Self {
        let context = self.inner.context.clone().with(key, value);

        self.derive(self.inner.uid, context)
    }

    #[must_use]
    pub fn with_principal(&self, uid: u64) -> Self {
        self.derive(uid, self.inner.context.clone())
    }

    /// Act as the superuser.
    #[must_use]
    pub fn sudo(&self) -> Self {
        self.with_principal(self.inner.config.superuser_id)
    }

    /// Run `f` against a nested transaction and fresh cache, then discard
    /// every change it made.
    pub fn simulate<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let child = Self {
            inner: Rc::new(EnvInner {
                registry: self.inner.registry,
                config: Arc::clone(&self.inner.config),
                policy: Arc::clone(&self.inner.policy),
                uid: self.inner.uid,
                tx: self.inner.tx.child()?,
                cache: Rc::new(RefCell::new(Cache::new())),
                context: self.inner.context.clone(),
            }),
        };
        let result = f(&child);
        child.inner.tx.rollback()?;

        result
    }

    // ---------------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------------

    /// Empty collection of `model`.
    pub fn pool(&self, model: &str) -> Result<RecordCollection, InternalError> {
        let model = self.inner.registry.get(model)?;

        Ok(RecordCollection::empty(model, self.clone()))
    }

    /// Dynamic call of `method` on an empty collection of `model`.
    pub fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Payload, InternalError> {
        self.pool(model)?.call(method, args)
    }

    /// Consult the access policy; the superuser always passes.
    pub fn check_access(&self, model: &str, op: AccessOp) -> Result<(), InternalError> {
        if self.is_superuser() {
            return Ok(());
        }

        self.inner
            .policy
            .check(self.inner.uid, model, op)
            .map_err(InternalError::from)
    }

    /// Default override from a `default_<Field>` context key.
    #[must_use]
    pub fn context_default(&self, field: &str) -> Option<&Value> {
        self.inner
            .context
            .get(&format!("{DEFAULT_CONTEXT_PREFIX}{field}"))
    }

    // ---------------------------------------------------------------------
    // Transaction control
    // ---------------------------------------------------------------------

    pub fn commit(&self) -> Result<(), InternalError> {
        self.inner.tx.commit()?;
        self.cache().clear();

        Ok(())
    }

    pub fn rollback(&self) -> Result<(), InternalError> {
        self.inner.tx.rollback()?;
        self.cache().clear();

        Ok(())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("uid", &self.inner.uid)
            .field("tx", &self.inner.tx.id())
            .field("context", &self.inner.context)
            .finish_non_exhaustive()
    }
}
