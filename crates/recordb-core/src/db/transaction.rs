use crate::{
    config::RuntimeConfig,
    db::store::{LinkSide, MemoryStore, Row, Storage, StoreError},
    env::{
        Environment,
        access::{AccessPolicy, AllowAll},
    },
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    obs::sink::{self, MetricsEvent},
    registry::Registry,
    value::RecordId,
};
use derive_more::Display;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error as ThisError;

type SharedStorage = Rc<RefCell<Box<dyn Storage>>>;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

///
/// TxError
///

#[derive(Debug, ThisError)]
pub enum TxError {
    #[error("transaction {id} is already {state}")]
    Finished { id: u64, state: TxState },
}

impl From<TxError> for InternalError {
    fn from(err: TxError) -> Self {
        Self::with_detail(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Transaction,
            ErrorDetail::Transaction(err),
        )
    }
}

///
/// TxState
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TxState {
    #[display("active")]
    Active,
    #[display("committed")]
    Committed,
    #[display("rolled back")]
    RolledBack,
}

///
/// Database
///
/// Owner of the committed storage. Every environment runs inside a
/// transaction begun here.
///

pub struct Database {
    committed: SharedStorage,
    registry: &'static Registry,
    config: Arc<RuntimeConfig>,
    policy: Arc<dyn AccessPolicy>,
}

impl Database {
    /// Database over a fresh in-memory store.
    #[must_use]
    pub fn new(registry: &'static Registry) -> Self {
        Self::with_storage(registry, Box::new(MemoryStore::new()))
    }

    /// Database over `storage`; one table per model and one link relation
    /// per many2many field are created if missing.
    #[must_use]
    pub fn with_storage(registry: &'static Registry, mut storage: Box<dyn Storage>) -> Self {
        for model in registry.models() {
            storage.ensure_table(model.table());
            for link in model.fields().filter_map(|f| f.link()) {
                storage.ensure_link(link);
            }
        }

        Self {
            committed: Rc::new(RefCell::new(storage)),
            registry,
            config: Arc::new(RuntimeConfig::default()),
            policy: Arc::new(AllowAll),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Apply a TOML runtime config; absent keys keep their defaults.
    pub fn with_config_toml(self, source: &str) -> Result<Self, InternalError> {
        let config = RuntimeConfig::from_toml(source)?;
        tracing::debug!(?config, "runtime config loaded");

        Ok(self.with_config(config))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &'static Registry {
        self.registry
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Start a transaction over the committed state.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        Transaction::begin(&self.committed)
    }

    /// Environment for `uid` inside a new transaction.
    #[must_use]
    pub fn environment(&self, uid: u64) -> Environment {
        Environment::new(
            self.registry,
            Arc::clone(&self.config),
            Arc::clone(&self.policy),
            uid,
            self.begin(),
        )
    }

    /// Run `f` in a new environment; commit if it succeeds, roll back if not.
    pub fn execute_in_new_environment<T>(
        &self,
        uid: u64,
        f: impl FnOnce(&Environment) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let env = self.environment(uid);
        match f(&env) {
            Ok(value) => {
                env.commit()?;
                Ok(value)
            }
            Err(err) => {
                env.rollback()?;
                Err(err)
            }
        }
    }

    /// Run `f` in a new environment that is always rolled back.
    pub fn simulate_in_new_environment<T>(
        &self,
        uid: u64,
        f: impl FnOnce(&Environment) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let env = self.environment(uid);
        let result = f(&env);
        env.rollback()?;

        result
    }
}

///
/// Transaction
///
/// Working copy of its target's storage. `commit` publishes the working copy
/// to the target; `rollback` discards it. A transaction dropped while still
/// active is rolled back.
///

#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TxInner>,
}

struct TxInner {
    id: u64,
    working: SharedStorage,
    target: SharedStorage,
    state: Cell<TxState>,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        if self.state.get() == TxState::Active {
            tracing::warn!(tx = self.id, "transaction dropped while active; rolling back");
        }
    }
}

impl Transaction {
    fn begin(target: &SharedStorage) -> Self {
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        let working = target.borrow().fork();
        tracing::debug!(tx = id, "transaction begin");

        Self {
            inner: Rc::new(TxInner {
                id,
                working: Rc::new(RefCell::new(working)),
                target: Rc::clone(target),
                state: Cell::new(TxState::Active),
            }),
        }
    }

    /// Nested transaction over this one's working copy.
    pub(crate) fn child(&self) -> Result<Self, InternalError> {
        self.ensure_active()?;

        Ok(Self::begin(&self.inner.working))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TxState::Active
    }

    pub fn commit(&self) -> Result<(), InternalError> {
        self.ensure_active()?;
        let snapshot = self.inner.working.borrow().fork();
        *self.inner.target.borrow_mut() = snapshot;
        self.inner.state.set(TxState::Committed);
        tracing::info!(tx = self.inner.id, "transaction committed");

        Ok(())
    }

    pub fn rollback(&self) -> Result<(), InternalError> {
        self.ensure_active()?;
        self.inner.state.set(TxState::RolledBack);
        tracing::info!(tx = self.inner.id, "transaction rolled back");

        Ok(())
    }

    fn ensure_active(&self) -> Result<(), InternalError> {
        match self.state() {
            TxState::Active => Ok(()),
            state => Err(TxError::Finished {
                id: self.inner.id,
                state,
            }
            .into()),
        }
    }

    // ---------------------------------------------------------------------
    // Storage access
    // ---------------------------------------------------------------------

    /// Borrow the working storage for reading.
    pub(crate) fn read<R>(
        &self,
        f: impl FnOnce(&dyn Storage) -> Result<R, StoreError>,
    ) -> Result<R, InternalError> {
        self.ensure_active()?;
        let storage = self.inner.working.borrow();

        Ok(f(&**storage)?)
    }

    /// Borrow the working storage for writing.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> Result<R, StoreError>,
    ) -> Result<R, InternalError> {
        self.ensure_active()?;
        let mut storage = self.inner.working.borrow_mut();

        Ok(f(&mut **storage)?)
    }

    /// One batched row retrieval.
    pub(crate) fn fetch(
        &self,
        table: &str,
        ids: &[RecordId],
        columns: &[&str],
    ) -> Result<Vec<(RecordId, Row)>, InternalError> {
        let rows = self.read(|s| s.fetch(table, ids, columns))?;
        record_fetch(table, rows.len());
        tracing::debug!(table, ids = ids.len(), rows = rows.len(), "fetch");

        Ok(rows)
    }

    /// One filtered scan.
    pub(crate) fn select(
        &self,
        table: &str,
        filter: &dyn Fn(RecordId, &Row) -> bool,
    ) -> Result<Vec<(RecordId, Row)>, InternalError> {
        let rows = self.read(|s| s.select(table, filter))?;
        record_fetch(table, rows.len());
        tracing::debug!(table, rows = rows.len(), "select");

        Ok(rows)
    }

    /// One batched link-relation lookup.
    pub(crate) fn links(
        &self,
        relation: &str,
        side: LinkSide,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, RecordId)>, InternalError> {
        let pairs = self.read(|s| s.links(relation, side, ids))?;
        record_fetch(relation, pairs.len());
        tracing::debug!(relation, ids = ids.len(), pairs = pairs.len(), "links");

        Ok(pairs)
    }
}

fn record_fetch(table: &str, rows: usize) {
    sink::record(MetricsEvent::StoreFetch {
        table,
        rows: u64::try_from(rows).unwrap_or(u64::MAX),
    });
}
