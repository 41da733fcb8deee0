//! Record collections.
//!
//! A `RecordCollection` is an ordered, duplicate-free set of identifiers bound
//! to one model and one environment. Collections are values: every operation
//! returns a new collection and never mutates its receiver. Field values are
//! read lazily through the environment cache, batched over the prefetch set.

pub(crate) mod access;
mod algebra;
pub(crate) mod crud;
pub(crate) mod introspect;
pub(crate) mod onchange;
pub(crate) mod recursion;

#[cfg(test)]
mod tests;

pub use introspect::FieldsGetArgs;
pub use onchange::{OnchangeParams, OnchangeResult, OnchangeTrace};

use crate::{
    ID_FIELD,
    db::search::{Condition, convert_limit},
    dispatch::Payload,
    env::{Environment, access::AccessOp},
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    model::{FieldInfo, Model},
    registry::base,
    value::{FieldMap, RecordId, Value},
};
use indexmap::IndexMap;
use std::{collections::HashSet, fmt, rc::Rc};
use thiserror::Error as ThisError;

///
/// CollectionError
///

#[derive(Debug, ThisError)]
pub enum CollectionError {
    #[error("cannot combine records of '{left}' with records of '{right}'")]
    ModelMismatch { left: String, right: String },

    #[error("expected a single record of '{model}', found {len}")]
    NotSingleton { model: String, len: usize },

    #[error("record {id} of '{model}' does not exist")]
    RecordNotFound { model: String, id: RecordId },
}

impl CollectionError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::ModelMismatch { .. } | Self::NotSingleton { .. } => ErrorClass::InvalidArgument,
            Self::RecordNotFound { .. } => ErrorClass::NotFound,
        }
    }
}

impl From<CollectionError> for InternalError {
    fn from(err: CollectionError) -> Self {
        Self::with_detail(
            err.class(),
            ErrorOrigin::Collection,
            ErrorDetail::Collection(err),
        )
    }
}

///
/// RecordCollection
///

#[derive(Clone)]
pub struct RecordCollection {
    model: &'static Model,
    env: Environment,
    ids: Vec<RecordId>,
    prefetch: Rc<Vec<RecordId>>,
}

impl RecordCollection {
    pub(crate) fn empty(model: &'static Model, env: Environment) -> Self {
        Self {
            model,
            env,
            ids: Vec::new(),
            prefetch: Rc::new(Vec::new()),
        }
    }

    /// Bind `ids` (deduplicated, first occurrence wins); they form their own
    /// prefetch set.
    pub(crate) fn from_ids(model: &'static Model, env: Environment, ids: Vec<RecordId>) -> Self {
        let ids = dedup(ids);
        let prefetch = Rc::new(ids.clone());

        Self {
            model,
            env,
            ids,
            prefetch,
        }
    }

    /// Bind `ids` with a wider prefetch set; `prefetch` must contain `ids`.
    pub(crate) fn with_prefetch(
        model: &'static Model,
        env: Environment,
        ids: Vec<RecordId>,
        prefetch: Vec<RecordId>,
    ) -> Self {
        Self {
            model,
            env,
            ids: dedup(ids),
            prefetch: Rc::new(prefetch),
        }
    }

    /// Same model and environment over `ids`.
    pub(crate) fn derive(&self, ids: Vec<RecordId>) -> Self {
        Self::from_ids(self.model, self.env.clone(), ids)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub const fn model(&self) -> &'static Model {
        self.model
    }

    #[must_use]
    pub const fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn prefetch(&self) -> &[RecordId] {
        &self.prefetch
    }

    /// One single-record collection per id, sharing this collection's
    /// prefetch set.
    #[must_use]
    pub fn records(&self) -> Vec<Self> {
        self.ids
            .iter()
            .map(|id| Self {
                model: self.model,
                env: self.env.clone(),
                ids: vec![*id],
                prefetch: Rc::clone(&self.prefetch),
            })
            .collect()
    }

    /// The identifier of a single-record collection.
    pub fn id(&self) -> Result<RecordId, InternalError> {
        self.ensure_one()?;

        Ok(self.ids[0])
    }

    pub fn ensure_one(&self) -> Result<(), InternalError> {
        if self.ids.len() == 1 {
            Ok(())
        } else {
            Err(CollectionError::NotSingleton {
                model: self.model.name().to_string(),
                len: self.ids.len(),
            }
            .into())
        }
    }

    /// This collection's records, re-bound to `env`.
    #[must_use]
    pub fn with_env(&self, env: &Environment) -> Self {
        Self::from_ids(self.model, env.clone(), self.ids.clone())
    }

    // ---------------------------------------------------------------------
    // Browsing and searching
    // ---------------------------------------------------------------------

    /// Collection of this model over `ids`. Existence is not checked.
    #[must_use]
    pub fn browse(&self, ids: &[RecordId]) -> Self {
        self.derive(ids.to_vec())
    }

    /// Records matching `condition`, in identifier order.
    pub fn search(&self, condition: &Condition) -> Result<Self, InternalError> {
        for field in condition.fields() {
            let descriptor = self.model.field(field)?;
            if field != ID_FIELD && !descriptor.is_column() {
                return Err(InternalError::new(
                    ErrorClass::InvalidArgument,
                    ErrorOrigin::Collection,
                    format!(
                        "field '{}.{field}' is not stored and cannot be searched",
                        self.model.name()
                    ),
                ));
            }
        }
        self.env.check_access(self.model.name(), AccessOp::Read)?;

        let rows = self
            .env
            .transaction()
            .select(self.model.table(), &|id, row| {
                condition.clauses().iter().all(|clause| {
                    if clause.field == ID_FIELD {
                        clause.matches(&id_value(id))
                    } else {
                        clause.matches(row.value(&clause.field))
                    }
                })
            })?;

        Ok(self.derive(rows.into_iter().map(|(id, _)| id).collect()))
    }

    /// Search truncated by a loosely-typed limit (see `convert_limit`).
    pub fn search_limit(&self, condition: &Condition, limit: &Value) -> Result<Self, InternalError> {
        let found = self.search(condition)?;

        Ok(
            match convert_limit(limit, self.env.config().default_search_limit) {
                Some(limit) if limit < found.len() => found.derive(found.ids[..limit].to_vec()),
                _ => found,
            },
        )
    }

    pub fn search_all(&self) -> Result<Self, InternalError> {
        self.search(&Condition::all())
    }

    pub fn search_count(&self, condition: &Condition) -> Result<usize, InternalError> {
        Ok(self.search(condition)?.len())
    }

    /// The subset of this collection's ids that exist in storage.
    pub fn fetch_existing(&self) -> Result<Self, InternalError> {
        if self.ids.is_empty() {
            return Ok(self.clone());
        }
        let rows = self
            .env
            .transaction()
            .fetch(self.model.table(), &self.ids, &[])?;

        Ok(self.derive(rows.into_iter().map(|(id, _)| id).collect()))
    }

    /// Fail with `RecordNotFound` for the first id absent from storage.
    pub fn ensure_exists(&self) -> Result<(), InternalError> {
        let existing = self.fetch_existing()?;
        let found: HashSet<RecordId> = existing.ids.iter().copied().collect();

        match self.ids.iter().find(|id| !found.contains(id)) {
            Some(id) => Err(CollectionError::RecordNotFound {
                model: self.model.name().to_string(),
                id: *id,
            }
            .into()),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    /// Dynamic call through the model's override chain for `method`.
    pub fn call(&self, method: &str, args: Vec<Payload>) -> Result<Payload, InternalError> {
        self.model.method(method)?.invoke(self, args)
    }

    /// Insert one record; fields absent from `values` take their defaults.
    pub fn create(&self, values: FieldMap) -> Result<Self, InternalError> {
        self.call(base::CREATE, vec![Payload::Map(values)])?
            .into_records()
    }

    /// Update every record with `values`.
    pub fn write(&self, values: FieldMap) -> Result<(), InternalError> {
        self.call(base::WRITE, vec![Payload::Map(values)])?;

        Ok(())
    }

    /// Write a single field.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), InternalError> {
        self.write(FieldMap::new().with(field, value))
    }

    /// Duplicate a single record, applying `overrides` last.
    pub fn copy(&self, overrides: FieldMap) -> Result<Self, InternalError> {
        self.call(base::COPY, vec![Payload::Map(overrides)])?
            .into_records()
    }

    /// Delete every record; returns the number removed.
    pub fn unlink(&self) -> Result<usize, InternalError> {
        let removed = self.call(base::UNLINK, Vec::new())?.into_value()?;

        Ok(removed
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or_default())
    }

    /// One field map per record, plus an `id` key.
    pub fn read(&self, fields: &[&str]) -> Result<Vec<FieldMap>, InternalError> {
        self.call(base::READ, vec![Payload::names(fields)])?
            .into_maps()
    }

    /// Populate the cache for `fields` (all fields when empty).
    pub fn load(&self, fields: &[&str]) -> Result<Self, InternalError> {
        self.call(base::LOAD, vec![Payload::names(fields)])?
            .into_records()
    }

    pub fn field_get(&self, name: &str) -> Result<FieldInfo, InternalError> {
        let map = self
            .call(base::FIELD_GET, vec![Payload::Value(Value::from(name))])?
            .into_map()?;

        FieldInfo::from_field_map(&map).ok_or_else(|| malformed(base::FIELD_GET))
    }

    pub fn fields_get(
        &self,
        args: &FieldsGetArgs,
    ) -> Result<IndexMap<String, FieldInfo>, InternalError> {
        let map = self
            .call(base::FIELDS_GET, vec![Payload::names(&args.fields)])?
            .into_map()?;

        map.into_iter()
            .map(|(name, info)| match info {
                Value::Map(info) => FieldInfo::from_field_map(&info)
                    .map(|info| (name, info))
                    .ok_or_else(|| malformed(base::FIELDS_GET)),
                _ => Err(malformed(base::FIELDS_GET)),
            })
            .collect()
    }

    pub fn default_get(&self) -> Result<FieldMap, InternalError> {
        self.call(base::DEFAULT_GET, Vec::new())?.into_map()
    }

    pub fn onchange(&self, params: &OnchangeParams) -> Result<OnchangeResult, InternalError> {
        let map = self
            .call(base::ONCHANGE, vec![Payload::Map(params.to_field_map())])?
            .into_map()?;

        OnchangeResult::from_field_map(&map).ok_or_else(|| malformed(base::ONCHANGE))
    }

    pub fn check_recursion(&self) -> Result<bool, InternalError> {
        self.call(base::CHECK_RECURSION, Vec::new())?.into_bool()
    }

    /// Display name of a single record.
    pub fn name_get(&self) -> Result<String, InternalError> {
        let value = self.call(base::NAME_GET, Vec::new())?.into_value()?;

        Ok(value.as_text().unwrap_or_default().to_string())
    }
}

impl fmt::Debug for RecordCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.model.name(), self.ids)
    }
}

impl From<&RecordCollection> for Value {
    fn from(rs: &RecordCollection) -> Self {
        Self::Ids(rs.ids.clone())
    }
}

impl From<RecordCollection> for Value {
    fn from(rs: RecordCollection) -> Self {
        Self::Ids(rs.ids)
    }
}

/// The `ID` pseudo-column as a value.
pub(crate) fn id_value(id: RecordId) -> Value {
    Value::Int(i64::try_from(id.get()).unwrap_or(i64::MAX))
}

fn dedup(ids: Vec<RecordId>) -> Vec<RecordId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn malformed(method: &str) -> InternalError {
    InternalError::new(
        ErrorClass::Internal,
        ErrorOrigin::Dispatch,
        format!("malformed result from '{method}'"),
    )
}
