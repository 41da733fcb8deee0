//! Lazy field access.
//!
//! Reads go through the environment cache. A miss on a column loads every
//! column for the uncached part of the prefetch set in one fetch; a miss on
//! a to-many field loads that relation for the same set in one lookup.
//! Computed values are evaluated per record and cached until a dependency
//! is written.

use crate::{
    ID_FIELD, READ_ID_KEY,
    collection::{CollectionError, RecordCollection, id_value},
    db::store::LinkSide,
    env::access::AccessOp,
    error::InternalError,
    model::{FieldDescriptor, FieldKind, FieldSource, FieldType, Model},
    value::{FieldMap, RecordId, Value},
};
use std::collections::{BTreeMap, HashSet};

impl RecordCollection {
    /// Value of `field` on a single-record collection. An empty collection
    /// reads as `Null`.
    pub fn get(&self, field: &str) -> Result<Value, InternalError> {
        let descriptor = self.model.field(field)?;
        if self.ids.is_empty() {
            return Ok(Value::Null);
        }
        let id = self.id()?;
        if field == ID_FIELD {
            return Ok(id_value(id));
        }

        let model = self.model.name();
        let name = descriptor.name();
        self.env.check_access(model, AccessOp::Read)?;
        if let Some(value) = self.env.cache().get(model, id, name).cloned() {
            return Ok(value);
        }

        match descriptor.kind() {
            FieldKind::StoredScalar | FieldKind::ToOne => {
                self.load_columns(&self.uncached(name), Some(id))?;
            }
            FieldKind::Computed if descriptor.is_stored() => {
                self.load_columns(&self.uncached(name), Some(id))?;
            }
            FieldKind::ToMany => {
                self.ensure_exists()?;
                self.load_to_many(descriptor, &self.uncached(name))?;
            }
            FieldKind::Computed | FieldKind::Related => {
                let value = self.compute(descriptor)?;
                self.env.cache().insert(model, id, name, value.clone());
                return Ok(value);
            }
        }

        Ok(self
            .env
            .cache()
            .get(model, id, name)
            .cloned()
            .unwrap_or_default())
    }

    /// Records referenced by relation `field`, across the whole collection.
    /// The result prefetches the targets of this collection's whole prefetch
    /// set, so walking the same hop from sibling records shares one fetch.
    pub fn related(&self, field: &str) -> Result<Self, InternalError> {
        let descriptor = self.model.field(field)?;
        let target = match descriptor.relation() {
            Some(target) if descriptor.field_type().is_relation() => {
                self.env.registry().get(target)?
            }
            _ => {
                return Err(InternalError::collection_invariant(format!(
                    "field '{}.{field}' is not a relation",
                    self.model.name()
                )));
            }
        };

        let mut ids = Vec::new();
        for record in self.records() {
            ids.extend_from_slice(record.get(field)?.ids());
        }
        let prefetch = self.cached_targets(descriptor.name(), &ids);

        Ok(Self::with_prefetch(target, self.env.clone(), ids, prefetch))
    }

    /// `ids` followed by every target of `field` already cached for the
    /// prefetch set.
    fn cached_targets(&self, field: &'static str, ids: &[RecordId]) -> Vec<RecordId> {
        let cache = self.env.cache();
        let model = self.model.name();
        let mut targets = ids.to_vec();
        for id in self.prefetch() {
            if let Some(value) = cache.get(model, *id, field) {
                targets.extend_from_slice(value.ids());
            }
        }

        super::dedup(targets)
    }

    /// Prefetch ids still missing `field` in the cache.
    fn uncached(&self, field: &'static str) -> Vec<RecordId> {
        let cache = self.env.cache();
        let model = self.model.name();

        let pending = self
            .prefetch()
            .iter()
            .chain(self.ids.iter())
            .filter(|id| !cache.contains(model, **id, field))
            .copied()
            .collect();

        super::dedup(pending)
    }

    /// Load every stored column of `ids` in one fetch. When `required` is
    /// given, its absence from storage is an error.
    pub(crate) fn load_columns(
        &self,
        ids: &[RecordId],
        required: Option<RecordId>,
    ) -> Result<(), InternalError> {
        if ids.is_empty() {
            return Ok(());
        }
        let columns = column_names(self.model);
        let rows = self
            .env
            .transaction()
            .fetch(self.model.table(), ids, &columns)?;

        if let Some(required) = required
            && !rows.iter().any(|(id, _)| *id == required)
        {
            return Err(CollectionError::RecordNotFound {
                model: self.model.name().to_string(),
                id: required,
            }
            .into());
        }

        let mut cache = self.env.cache();
        for (id, row) in rows {
            for &column in &columns {
                let value = row.get(column).cloned().unwrap_or_default();
                cache.insert(self.model.name(), id, column, value);
            }
        }

        Ok(())
    }

    /// Load one to-many relation for `ids` in one lookup.
    pub(crate) fn load_to_many(
        &self,
        descriptor: &'static FieldDescriptor,
        ids: &[RecordId],
    ) -> Result<(), InternalError> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.env.transaction();
        let mut grouped: BTreeMap<RecordId, Vec<RecordId>> =
            ids.iter().map(|id| (*id, Vec::new())).collect();

        match descriptor.field_type() {
            FieldType::One2Many => {
                let target = self
                    .env
                    .registry()
                    .get(descriptor.relation().unwrap_or_default())?;
                let reverse = descriptor.reverse().unwrap_or_default();
                let wanted: HashSet<RecordId> = ids.iter().copied().collect();
                let rows = tx.select(target.table(), &|_, row| {
                    row.value(reverse)
                        .first_id()
                        .is_some_and(|parent| wanted.contains(&parent))
                })?;
                for (child, row) in rows {
                    if let Some(children) = row
                        .value(reverse)
                        .first_id()
                        .and_then(|parent| grouped.get_mut(&parent))
                    {
                        children.push(child);
                    }
                }
            }
            FieldType::Many2Many => {
                let link = descriptor.link().unwrap_or_default();
                for (left, right) in tx.links(link, LinkSide::Left, ids)? {
                    if let Some(rights) = grouped.get_mut(&left) {
                        rights.push(right);
                    }
                }
            }
            _ => {}
        }

        let mut cache = self.env.cache();
        for (id, related) in grouped {
            cache.insert(self.model.name(), id, descriptor.name(), Value::Ids(related));
        }

        Ok(())
    }

    /// Evaluate a non-stored computed or related field on a single record.
    pub(crate) fn compute(&self, descriptor: &FieldDescriptor) -> Result<Value, InternalError> {
        match &descriptor.source {
            FieldSource::Computed { compute, .. } => compute(self),
            FieldSource::Related { path } => {
                let mut segments: Vec<&str> = path.split('.').collect();
                let last = segments.pop().unwrap_or_default();
                let mut current = self.clone();
                for segment in segments {
                    current = current.related(segment)?;
                    if current.is_empty() {
                        return Ok(Value::Null);
                    }
                }

                current.get(last)
            }
            FieldSource::Stored => self.get(descriptor.name()),
        }
    }
}

/// Populate the cache for `fields` over the whole collection, with at most
/// one storage retrieval per distinct source. Empty `fields` means every
/// field.
pub(crate) fn load(rs: &RecordCollection, fields: &[String]) -> Result<(), InternalError> {
    if rs.is_empty() {
        return Ok(());
    }
    rs.env.check_access(rs.model.name(), AccessOp::Read)?;

    let descriptors = resolve(rs.model, fields)?;
    if descriptors.iter().any(|d| d.is_column() && d.name() != ID_FIELD) {
        rs.load_columns(&rs.ids, None)?;
    }
    for descriptor in descriptors
        .iter()
        .copied()
        .filter(|d| d.kind() == FieldKind::ToMany)
    {
        rs.load_to_many(descriptor, &rs.ids)?;
    }
    for descriptor in descriptors.iter().filter(|d| !d.is_stored()) {
        for record in rs.records() {
            record.get(descriptor.name())?;
        }
    }

    Ok(())
}

/// One field map per record with the requested fields and an `id` key.
pub(crate) fn read(rs: &RecordCollection, fields: &[String]) -> Result<Vec<FieldMap>, InternalError> {
    let descriptors = resolve(rs.model, fields)?;
    load(rs, fields)?;

    rs.records()
        .into_iter()
        .map(|record| {
            let mut map = FieldMap::new();
            for descriptor in &descriptors {
                map.insert(descriptor.name().to_string(), record.get(descriptor.name())?);
            }
            map.insert(READ_ID_KEY.to_string(), id_value(record.id()?));

            Ok(map)
        })
        .collect()
}

fn resolve(
    model: &'static Model,
    fields: &[String],
) -> Result<Vec<&'static FieldDescriptor>, InternalError> {
    if fields.is_empty() {
        return Ok(model.fields().filter(|f| f.name() != ID_FIELD).collect());
    }

    fields.iter().map(|name| model.field(name)).collect()
}

/// Stored columns of `model`, excluding the identifier.
pub(crate) fn column_names(model: &'static Model) -> Vec<&'static str> {
    model
        .columns()
        .map(FieldDescriptor::name)
        .filter(|name| *name != ID_FIELD)
        .collect()
}
