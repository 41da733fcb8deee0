//! Persistence: create, write, copy and unlink.
//!
//! Every mutation goes through the environment's transaction, invalidates
//! the cache entries it makes stale, and refreshes the computed fields that
//! depend on what changed. A failed mutation clears the whole cache so no
//! partially-applied value survives it.

use crate::{
    ID_FIELD,
    collection::RecordCollection,
    db::store::{LinkSide, Row},
    env::{Environment, access::AccessOp},
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{FieldDescriptor, FieldKind, FieldType, Model},
    obs::sink::{self, MetricsEvent},
    registry::{CREATE_DATE, WRITE_DATE},
    value::{FieldMap, RecordId, Value},
};
use chrono::Utc;
use std::collections::HashSet;

///
/// Prepared
///
/// Validated, normalized input split into own-table columns and to-many
/// assignments.
///

#[derive(Default)]
struct Prepared {
    row: Row,
    to_many: Vec<(&'static FieldDescriptor, Vec<RecordId>)>,
}

impl Prepared {
    fn changed(&self) -> Vec<&str> {
        self.row
            .names()
            .chain(self.to_many.iter().map(|(field, _)| field.name()))
            .collect()
    }
}

// ---------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------

/// Insert one record built from `values` and the model's defaults.
pub(crate) fn create(rs: &RecordCollection, values: FieldMap) -> Result<RecordCollection, InternalError> {
    let env = rs.env();
    let model = rs.model();
    env.check_access(model.name(), AccessOp::Create)?;

    let result = create_record(env, model, rs, values);
    if result.is_err() {
        env.cache().clear();
    }

    result
}

fn create_record(
    env: &Environment,
    model: &'static Model,
    rs: &RecordCollection,
    mut values: FieldMap,
) -> Result<RecordCollection, InternalError> {
    for (field, value) in defaults(env, model) {
        if !values.contains_key(&field) {
            values.insert(field, value);
        }
    }
    let prepared = prepare(model, &values)?;
    let changed: Vec<String> = prepared.changed().into_iter().map(ToString::to_string).collect();
    let Prepared { mut row, to_many } = prepared;

    if env.config().track_write_dates {
        row.insert(CREATE_DATE.to_string(), Value::DateTime(Utc::now()));
        row.insert(WRITE_DATE.to_string(), Value::Null);
    }

    let id = env
        .transaction()
        .write(|s| s.insert(model.table(), row.clone()))?;
    let record = rs.derive(vec![id]);

    for (field, targets) in &to_many {
        assign_to_many(&record, field, targets)?;
    }

    // stored computed fields, dependencies first
    for name in model.compute_order() {
        let field = model.field(name)?;
        if field.is_stored() {
            store_computed(env, model, field, &[id])?;
        }
    }

    invalidate_inverses(env, model, &row, &[])?;
    let changed: Vec<&str> = changed.iter().map(String::as_str).collect();
    propagate(env, model, &[id], &changed)?;

    sink::record(MetricsEvent::Create { model: model.name() });
    tracing::debug!(model = model.name(), id = id.get(), "record created");

    Ok(record)
}

/// Default values for every field that declares one, with `default_<Field>`
/// context keys taking precedence.
pub(crate) fn defaults(env: &Environment, model: &'static Model) -> FieldMap {
    let mut out = FieldMap::new();
    for field in model.fields() {
        if !field.is_stored() || field.is_computed() || is_automatic(field.name()) {
            continue;
        }
        let value = env
            .context_default(field.name())
            .cloned()
            .or_else(|| field.default().map(|d| d.resolve(env)));
        if let Some(value) = value {
            out.insert(field.name().to_string(), value);
        }
    }

    out
}

// ---------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------

/// Update every record of `rs` with `values`.
pub(crate) fn write(rs: &RecordCollection, values: &FieldMap) -> Result<(), InternalError> {
    let env = rs.env();
    let model = rs.model();
    let prepared = prepare(model, values)?;
    if rs.is_empty() {
        return Ok(());
    }
    env.check_access(model.name(), AccessOp::Write)?;

    let result = write_records(env, model, rs, prepared);
    if result.is_err() {
        env.cache().clear();
    }

    result
}

fn write_records(
    env: &Environment,
    model: &'static Model,
    rs: &RecordCollection,
    prepared: Prepared,
) -> Result<(), InternalError> {
    if prepared
        .to_many
        .iter()
        .any(|(field, _)| field.field_type() == FieldType::One2Many)
    {
        rs.ensure_one()?;
    }
    rs.ensure_exists()?;
    let ids = rs.ids();
    let mut changed: Vec<String> = prepared.changed().into_iter().map(ToString::to_string).collect();
    let Prepared { mut row, to_many } = prepared;

    if env.config().track_write_dates {
        row.insert(WRITE_DATE.to_string(), Value::DateTime(Utc::now()));
        changed.push(WRITE_DATE.to_string());
    }

    // previous parents of re-pointed many2one columns
    let repointed: Vec<&str> = row
        .names()
        .filter(|name| !model.inverses_of(name).is_empty())
        .collect();
    let previous = if repointed.is_empty() {
        Vec::new()
    } else {
        env.transaction().fetch(model.table(), ids, &repointed)?
    };

    if !row.is_empty() {
        env.transaction()
            .write(|s| s.update(model.table(), ids, &row))?;
    }
    {
        let mut cache = env.cache();
        for name in row.names() {
            cache.invalidate(model.name(), ids, name);
        }
    }
    for (field, targets) in &to_many {
        assign_to_many(rs, field, targets)?;
    }

    let old_rows: Vec<Row> = previous.into_iter().map(|(_, row)| row).collect();
    invalidate_inverses(env, model, &row, &old_rows)?;
    let changed: Vec<&str> = changed.iter().map(String::as_str).collect();
    propagate(env, model, ids, &changed)?;

    sink::record(MetricsEvent::Write {
        model: model.name(),
        rows: u64::try_from(ids.len()).unwrap_or(u64::MAX),
    });
    tracing::debug!(model = model.name(), rows = ids.len(), fields = ?changed, "records written");

    Ok(())
}

// ---------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------

/// Duplicate a single record: copyable stored columns, no to-many content,
/// `overrides` applied last.
pub(crate) fn copy(rs: &RecordCollection, overrides: FieldMap) -> Result<RecordCollection, InternalError> {
    rs.ensure_one()?;
    rs.ensure_exists()?;
    let model = rs.model();

    let mut values = FieldMap::new();
    for field in model.columns() {
        if field.name() == ID_FIELD || field.is_computed() || !field.is_copyable() {
            continue;
        }
        values.insert(field.name().to_string(), rs.get(field.name())?);
    }
    values.merge(overrides);

    rs.derive(Vec::new()).create(values)
}

// ---------------------------------------------------------------------
// Unlink
// ---------------------------------------------------------------------

/// Delete every record of `rs`, detaching references to it first.
pub(crate) fn unlink(rs: &RecordCollection) -> Result<usize, InternalError> {
    if rs.is_empty() {
        return Ok(0);
    }
    let env = rs.env();
    let model = rs.model();
    env.check_access(model.name(), AccessOp::Unlink)?;

    let result = unlink_records(env, model, rs.ids());
    if result.is_err() {
        env.cache().clear();
    }

    result
}

fn unlink_records(
    env: &Environment,
    model: &'static Model,
    ids: &[RecordId],
) -> Result<usize, InternalError> {
    let tx = env.transaction();
    let doomed: HashSet<RecordId> = ids.iter().copied().collect();

    // parents whose one2many lists the doomed records
    let parented: Vec<&str> = model
        .columns()
        .map(FieldDescriptor::name)
        .filter(|name| !model.inverses_of(name).is_empty())
        .collect();
    if !parented.is_empty() {
        let rows: Vec<Row> = tx
            .fetch(model.table(), ids, &parented)?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        invalidate_inverses(env, model, &Row::new(), &rows)?;
    }

    for other in env.registry().models() {
        for field in other.fields() {
            if field.relation() != Some(model.name()) {
                continue;
            }
            match field.kind() {
                FieldKind::ToOne => {
                    let referencing: Vec<RecordId> = tx
                        .select(other.table(), &|_, row| {
                            row.value(field.name()).ids().iter().any(|id| doomed.contains(id))
                        })?
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect();
                    if referencing.is_empty() {
                        continue;
                    }
                    let cleared = Row::new().with(field.name(), Value::Null);
                    tx.write(|s| s.update(other.table(), &referencing, &cleared))?;
                    env.cache().invalidate(other.name(), &referencing, field.name());
                    propagate(env, other, &referencing, &[field.name()])?;
                }
                FieldKind::ToMany if field.field_type() == FieldType::Many2Many => {
                    let link = field.link().unwrap_or_default();
                    let linking = super::dedup(
                        tx.links(link, LinkSide::Right, ids)?
                            .into_iter()
                            .map(|(left, _)| left)
                            .collect(),
                    );
                    if linking.is_empty() {
                        continue;
                    }
                    tx.write(|s| s.remove_links(link, LinkSide::Right, ids))?;
                    env.cache().invalidate(other.name(), &linking, field.name());
                    propagate(env, other, &linking, &[field.name()])?;
                }
                _ => {}
            }
        }
    }

    for field in model.fields() {
        if field.field_type() == FieldType::Many2Many && field.kind() == FieldKind::ToMany {
            let link = field.link().unwrap_or_default();
            tx.write(|s| s.remove_links(link, LinkSide::Left, ids))?;
        }
    }

    let removed = tx.write(|s| s.delete(model.table(), ids))?;
    env.cache().evict_records(model.name(), ids);
    tracing::debug!(model = model.name(), removed, "records unlinked");

    Ok(removed)
}

// ---------------------------------------------------------------------
// Input preparation
// ---------------------------------------------------------------------

fn prepare(model: &'static Model, values: &FieldMap) -> Result<Prepared, InternalError> {
    let mut prepared = Prepared::default();

    for (name, value) in values.iter() {
        let field = model.field(name)?;
        if field.name() == ID_FIELD {
            return Err(invalid(model, name, "identifiers are assigned by storage"));
        }
        if field.is_computed() {
            return Err(invalid(model, name, "computed fields cannot be written"));
        }

        match field.field_type() {
            FieldType::One2Many | FieldType::Many2Many => {
                let targets = to_ids(value).ok_or_else(|| {
                    invalid(model, name, &format!("expected ids, found {}", value.type_name()))
                })?;
                prepared.to_many.push((field, targets));
            }
            FieldType::Many2One => {
                let target = to_one(value).ok_or_else(|| {
                    invalid(model, name, &format!("expected at most one id, found {value:?}"))
                })?;
                prepared.row.insert(name.clone(), target);
            }
            field_type => {
                let value = coerce(field_type, value).ok_or_else(|| {
                    invalid(
                        model,
                        name,
                        &format!("expected {field_type}, found {}", value.type_name()),
                    )
                })?;
                prepared.row.insert(name.clone(), value);
            }
        }
    }

    Ok(prepared)
}

#[expect(clippy::cast_precision_loss)]
fn coerce(field_type: FieldType, value: &Value) -> Option<Value> {
    let value = match (field_type, value) {
        (_, Value::Null) => Value::Null,
        (FieldType::Char | FieldType::Text, Value::Text(_))
        | (FieldType::Integer, Value::Int(_))
        | (FieldType::Float, Value::Float(_))
        | (FieldType::Boolean, Value::Bool(_))
        | (FieldType::DateTime, Value::DateTime(_)) => value.clone(),
        (FieldType::Float, Value::Int(n)) => Value::Float(*n as f64),
        (FieldType::Char | FieldType::Text | FieldType::DateTime, Value::Bool(false)) => Value::Null,
        _ => return None,
    };

    Some(value)
}

fn to_one(value: &Value) -> Option<Value> {
    match value {
        Value::Null | Value::Bool(false) => Some(Value::Null),
        Value::Int(n) => u64::try_from(*n)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| Value::Ids(vec![RecordId(n)])),
        Value::Ids(ids) => match ids.as_slice() {
            [] => Some(Value::Null),
            [_] => Some(value.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn to_ids(value: &Value) -> Option<Vec<RecordId>> {
    match value {
        Value::Null | Value::Bool(false) => Some(Vec::new()),
        Value::Ids(ids) => Some(ids.clone()),
        Value::List(items) => items
            .iter()
            .map(|item| item.as_int().and_then(|n| u64::try_from(n).ok()).map(RecordId))
            .collect(),
        _ => None,
    }
}

fn invalid(model: &Model, field: &str, reason: &str) -> InternalError {
    InternalError::new(
        ErrorClass::InvalidArgument,
        ErrorOrigin::Collection,
        format!("cannot set '{}.{field}': {reason}", model.name()),
    )
}

fn is_automatic(name: &str) -> bool {
    name == ID_FIELD || name == CREATE_DATE || name == WRITE_DATE
}

// ---------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------

fn assign_to_many(
    rs: &RecordCollection,
    field: &'static FieldDescriptor,
    targets: &[RecordId],
) -> Result<(), InternalError> {
    let env = rs.env();
    let tx = env.transaction();

    match field.field_type() {
        FieldType::One2Many => {
            let parent = rs.id()?;
            let target = env.registry().get(field.relation().unwrap_or_default())?;
            let reverse = target.field(field.reverse().unwrap_or_default())?;
            let wanted: HashSet<RecordId> = targets.iter().copied().collect();

            let current: Vec<RecordId> = tx
                .select(target.table(), &|_, row| {
                    row.value(reverse.name()).first_id() == Some(parent)
                })?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            let released: Vec<RecordId> =
                current.iter().filter(|id| !wanted.contains(id)).copied().collect();
            let previous_parents: Vec<RecordId> = tx
                .fetch(target.table(), targets, &[reverse.name()])?
                .into_iter()
                .filter_map(|(_, row)| row.value(reverse.name()).first_id())
                .filter(|id| *id != parent)
                .collect();

            tx.write(|s| {
                s.update(
                    target.table(),
                    &released,
                    &Row::new().with(reverse.name(), Value::Null),
                )?;
                s.update(
                    target.table(),
                    targets,
                    &Row::new().with(reverse.name(), Value::Ids(vec![parent])),
                )
            })?;

            let touched: Vec<RecordId> = released.iter().chain(targets).copied().collect();
            {
                let mut cache = env.cache();
                cache.invalidate(target.name(), &touched, reverse.name());
                // children may have left other parents
                cache.invalidate_field(rs.model().name(), field.name());
            }
            propagate(env, target, &touched, &[reverse.name()])?;
            propagate(env, rs.model(), &previous_parents, &[field.name()])?;
        }
        FieldType::Many2Many => {
            let link = field.link().unwrap_or_default();
            tx.write(|s| {
                for id in rs.ids() {
                    s.replace_links(link, *id, targets)?;
                }
                Ok(())
            })?;
            env.cache().invalidate(rs.model().name(), rs.ids(), field.name());
        }
        _ => {}
    }

    Ok(())
}

/// Drop one2many caches of parents gained (`row`) or lost (`old_rows`)
/// through many2one columns.
fn invalidate_inverses(
    env: &Environment,
    model: &'static Model,
    row: &Row,
    old_rows: &[Row],
) -> Result<(), InternalError> {
    let columns: HashSet<&str> = row
        .names()
        .chain(old_rows.iter().flat_map(|old| old.names()))
        .collect();

    for column in columns {
        let inverses = model.inverses_of(column);
        if inverses.is_empty() {
            continue;
        }
        let mut parents: Vec<RecordId> = row.value(column).ids().to_vec();
        for old in old_rows {
            parents.extend_from_slice(old.value(column).ids());
        }
        if parents.is_empty() {
            continue;
        }

        for inverse in inverses {
            let parent_model = env.registry().get(&inverse.model)?;
            let field = parent_model.field(&inverse.field)?;
            env.cache().invalidate(parent_model.name(), &parents, field.name());
            propagate(env, parent_model, &parents, &[field.name()])?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------

/// Refresh every computed field that depends on `fields` of `ids`.
/// Non-stored dependents are invalidated; stored ones are recomputed and
/// written back, which cascades further.
pub(crate) fn propagate(
    env: &Environment,
    model: &'static Model,
    ids: &[RecordId],
    fields: &[&str],
) -> Result<(), InternalError> {
    if ids.is_empty() {
        return Ok(());
    }

    for field in fields {
        for dependent in model.dependents_of(field) {
            let owner = env.registry().get(&dependent.model)?;
            let target = owner.field(&dependent.field)?;
            let affected = affected_records(env, owner, &dependent.path, ids)?;
            if affected.is_empty() {
                continue;
            }

            env.cache().invalidate(owner.name(), &affected, target.name());
            if target.is_stored() {
                store_computed(env, owner, target, &affected)?;
            } else {
                propagate(env, owner, &affected, &[target.name()])?;
            }
        }
    }

    Ok(())
}

/// Records of `owner` whose dependency `path` reaches any of `ids`.
fn affected_records(
    env: &Environment,
    owner: &'static Model,
    path: &[String],
    ids: &[RecordId],
) -> Result<Vec<RecordId>, InternalError> {
    // models along the path, owner first
    let mut models = vec![owner];
    for hop in path {
        let current = models[models.len() - 1];
        let target = current.field(hop)?.relation().unwrap_or_default();
        models.push(env.registry().get(target)?);
    }

    let tx = env.transaction();
    let mut current: Vec<RecordId> = ids.to_vec();
    for (index, hop) in path.iter().enumerate().rev() {
        if current.is_empty() {
            break;
        }
        let source = models[index];
        let field = source.field(hop)?;
        let reached: HashSet<RecordId> = current.iter().copied().collect();

        current = match field.field_type() {
            FieldType::Many2One => tx
                .select(source.table(), &|_, row| {
                    row.value(field.name()).ids().iter().any(|id| reached.contains(id))
                })?
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
            FieldType::One2Many => {
                let reverse = field.reverse().unwrap_or_default();
                tx.fetch(models[index + 1].table(), &current, &[reverse])?
                    .into_iter()
                    .filter_map(|(_, row)| row.value(reverse).first_id())
                    .collect()
            }
            FieldType::Many2Many => tx
                .links(field.link().unwrap_or_default(), LinkSide::Right, &current)?
                .into_iter()
                .map(|(left, _)| left)
                .collect(),
            _ => Vec::new(),
        };
        let mut seen = HashSet::new();
        current.retain(|id| seen.insert(*id));
    }

    Ok(current)
}

/// Recompute a stored computed field on `ids`, persist it and cascade.
fn store_computed(
    env: &Environment,
    model: &'static Model,
    field: &'static FieldDescriptor,
    ids: &[RecordId],
) -> Result<(), InternalError> {
    for id in ids {
        let record = RecordCollection::from_ids(model, env.clone(), vec![*id]);
        let value = record.compute(field)?;
        env.transaction().write(|s| {
            s.update(
                model.table(),
                &[*id],
                &Row::new().with(field.name(), value.clone()),
            )
        })?;
        env.cache().insert(model.name(), *id, field.name(), value);
    }
    tracing::trace!(
        model = model.name(),
        field = field.name(),
        rows = ids.len(),
        "stored computed field refreshed"
    );

    propagate(env, model, ids, &[field.name()])
}
