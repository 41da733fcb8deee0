//! Defaults and simulated edits.
//!
//! `onchange` replays a client-side edit inside `Environment::simulate`:
//! the submitted values are applied to a scratch copy of the record, the
//! onchange routines of the edited fields run in queue order, and the
//! resulting deltas are reported without anything being persisted. Deltas
//! are written back to the scratch record as they are produced, so a later
//! routine sees earlier deltas and the last delta applied to a field wins.

use crate::{
    ID_FIELD,
    collection::{RecordCollection, crud},
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::sink::{self, MetricsEvent},
    value::{FieldMap, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

const FIELDS_KEY: &str = "Fields";
const TRIGGERS_KEY: &str = "Onchange";
const VALUES_KEY: &str = "Values";
const RESULT_VALUE_KEY: &str = "value";
const RESULT_TRACE_KEY: &str = "trace";

///
/// OnchangeParams
///
/// `fields`   → the fields the user edited, in edit order.
/// `triggers` → per-field switch; a routine runs only when its entry is
///              present, non-empty and not `"0"`.
/// `values`   → the current form values.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OnchangeParams {
    pub fields: Vec<String>,
    pub triggers: BTreeMap<String, String>,
    pub values: FieldMap,
}

impl OnchangeParams {
    #[must_use]
    pub fn new(fields: &[&str], values: FieldMap) -> Self {
        Self {
            fields: fields.iter().map(ToString::to_string).collect(),
            triggers: fields.iter().map(|f| ((*f).to_string(), "1".to_string())).collect(),
            values,
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, field: &str, trigger: &str) -> Self {
        self.triggers.insert(field.to_string(), trigger.to_string());
        self
    }

    fn is_enabled(&self, field: &str) -> bool {
        self.triggers
            .get(field)
            .is_some_and(|t| !t.is_empty() && t != "0")
    }

    /// Dynamic-call form: `{"Fields": [..], "Onchange": {..}, "Values": {..}}`.
    #[must_use]
    pub fn to_field_map(&self) -> FieldMap {
        FieldMap::new()
            .with(
                FIELDS_KEY,
                Value::List(self.fields.iter().map(|f| Value::from(f.as_str())).collect()),
            )
            .with(
                TRIGGERS_KEY,
                self.triggers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect::<FieldMap>(),
            )
            .with(VALUES_KEY, self.values.clone())
    }

    pub fn from_map(map: FieldMap) -> Result<Self, InternalError> {
        let bad = |key: &str, found: &Value| {
            InternalError::new(
                ErrorClass::InvalidArgument,
                ErrorOrigin::Onchange,
                format!("onchange parameter '{key}' is malformed: found {}", found.type_name()),
            )
        };

        let mut params = Self::default();
        for (key, value) in map {
            match (key.as_str(), value) {
                (FIELDS_KEY, Value::List(items)) => {
                    for item in items {
                        match item {
                            Value::Text(field) => params.fields.push(field),
                            other => return Err(bad(FIELDS_KEY, &other)),
                        }
                    }
                }
                (TRIGGERS_KEY, Value::Map(triggers)) => {
                    for (field, trigger) in triggers {
                        let trigger = match trigger {
                            Value::Text(t) => t,
                            Value::Int(n) => n.to_string(),
                            Value::Bool(b) => (if b { "1" } else { "0" }).to_string(),
                            Value::Null => String::new(),
                            other => return Err(bad(TRIGGERS_KEY, &other)),
                        };
                        params.triggers.insert(field, trigger);
                    }
                }
                (VALUES_KEY, Value::Map(values)) => params.values = values,
                (FIELDS_KEY | TRIGGERS_KEY | VALUES_KEY, Value::Null) => {}
                (FIELDS_KEY | TRIGGERS_KEY | VALUES_KEY, other) => return Err(bad(&key, &other)),
                _ => {
                    return Err(InternalError::new(
                        ErrorClass::InvalidArgument,
                        ErrorOrigin::Onchange,
                        format!("unknown onchange parameter '{key}'"),
                    ));
                }
            }
        }

        Ok(params)
    }
}

///
/// OnchangeTrace
///
/// One routine invocation: `field`'s routine ran because the user edited
/// `trigger`.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OnchangeTrace {
    pub trigger: String,
    pub field: String,
}

///
/// OnchangeResult
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OnchangeResult {
    pub value: FieldMap,
    pub trace: Vec<OnchangeTrace>,
}

impl OnchangeResult {
    #[must_use]
    pub fn to_field_map(&self) -> FieldMap {
        let trace = self
            .trace
            .iter()
            .map(|t| {
                Value::Map(
                    FieldMap::new()
                        .with("trigger", t.trigger.as_str())
                        .with("field", t.field.as_str()),
                )
            })
            .collect();

        FieldMap::new()
            .with(RESULT_VALUE_KEY, self.value.clone())
            .with(RESULT_TRACE_KEY, Value::List(trace))
    }

    #[must_use]
    pub fn from_field_map(map: &FieldMap) -> Option<Self> {
        let Value::Map(value) = map.value(RESULT_VALUE_KEY) else {
            return None;
        };
        let trace = match map.value(RESULT_TRACE_KEY) {
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Map(entry) => Some(OnchangeTrace {
                        trigger: entry.value("trigger").as_text()?.to_string(),
                        field: entry.value("field").as_text()?.to_string(),
                    }),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()?,
            Value::Null => Vec::new(),
            _ => return None,
        };

        Some(Self {
            value: value.clone(),
            trace,
        })
    }
}

/// Defaults a new record of this model would receive.
pub(crate) fn default_get(rs: &RecordCollection) -> Result<FieldMap, InternalError> {
    Ok(crud::defaults(rs.env(), rs.model()))
}

/// Simulate editing `params.fields` with `params.values` on the receiver
/// (or on a new record when the receiver is empty).
pub(crate) fn onchange(
    rs: &RecordCollection,
    params: &OnchangeParams,
) -> Result<OnchangeResult, InternalError> {
    let model = rs.model();
    for name in params.fields.iter().chain(params.values.keys()) {
        model.field(name)?;
    }
    if !rs.is_empty() {
        rs.ensure_one()?;
    }

    let result = rs.env().simulate(|sim| {
        let initial = params.values.filtered(|name| {
            name != ID_FIELD && model.field(name).is_ok_and(|f| !f.is_computed())
        });
        let record = if rs.is_empty() {
            sim.pool(model.name())?.create(initial)?
        } else {
            let record = rs.with_env(sim);
            record.write(initial)?;
            record
        };

        let mut queue: VecDeque<(String, String)> = params
            .fields
            .iter()
            .map(|f| (f.clone(), f.clone()))
            .collect();
        let mut visited = HashSet::new();
        let mut applied: Vec<String> = Vec::new();
        let mut trace = Vec::new();

        while let Some((field, trigger)) = queue.pop_front() {
            if !visited.insert(field.clone()) || !params.is_enabled(&field) {
                continue;
            }
            let Some(routine) = model.field(&field)?.onchange_routine() else {
                continue;
            };

            let deltas = routine(&record)?;
            trace.push(OnchangeTrace {
                trigger: trigger.clone(),
                field: field.clone(),
            });
            tracing::trace!(
                model = model.name(),
                field = %field,
                trigger = %trigger,
                deltas = deltas.len(),
                "onchange routine"
            );
            if deltas.is_empty() {
                continue;
            }

            record.write(deltas.clone())?;
            for name in deltas.keys() {
                if !applied.contains(name) {
                    applied.push(name.clone());
                }
                queue.push_back((name.clone(), trigger.clone()));
            }
        }

        let mut value = FieldMap::new();
        for name in &applied {
            value.insert(name.clone(), record.get(name)?);
        }

        Ok(OnchangeResult { value, trace })
    })?;

    sink::record(MetricsEvent::Onchange {
        model: model.name(),
        routines: u64::try_from(result.trace.len()).unwrap_or(u64::MAX),
    });
    tracing::debug!(
        model = model.name(),
        routines = result.trace.len(),
        fields = result.value.len(),
        "onchange simulated"
    );

    Ok(result)
}
