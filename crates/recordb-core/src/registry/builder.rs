use crate::{
    ID_FIELD,
    collection::RecordCollection,
    dispatch::{MethodChain, MethodFn, MethodImpl, Next, Payload},
    error::InternalError,
    model::{DefaultValue, FieldDescriptor, FieldSource, FieldType, Model, graph},
    registry::{Registry, RegistryError, base},
    value::Value,
};
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use std::{collections::HashMap, sync::Arc};

/// Module name used when none has been selected.
pub(crate) const BASE_MODULE: &str = "base";

pub(crate) const CREATE_DATE: &str = "CreateDate";
pub(crate) const WRITE_DATE: &str = "WriteDate";
pub(crate) const LAST_UPDATE: &str = "LastUpdate";
pub(crate) const DISPLAY_NAME: &str = "DisplayName";

const AUTOMATIC_FIELDS: [&str; 5] = [ID_FIELD, CREATE_DATE, WRITE_DATE, LAST_UPDATE, DISPLAY_NAME];
const DEFAULT_NAME_FIELD: &str = "Name";

///
/// ModelDraft
///
/// Mutable model state while modules are still registering.
///

pub(crate) struct ModelDraft {
    name: String,
    module: String,
    fields: IndexMap<String, FieldDescriptor>,
    field_modules: HashMap<String, String>,
    methods: IndexMap<String, MethodChain>,
    name_field: Option<String>,
    hierarchy_field: Option<String>,
}

impl ModelDraft {
    fn new(name: &str, module: &str) -> Self {
        let mut draft = Self {
            name: name.to_string(),
            module: module.to_string(),
            fields: IndexMap::new(),
            field_modules: HashMap::new(),
            methods: IndexMap::new(),
            name_field: None,
            hierarchy_field: None,
        };
        for field in automatic_fields() {
            draft.fields.insert(field.name.clone(), field);
        }
        base::install(&mut draft);

        draft
    }

    pub(crate) fn add_method(&mut self, module: &str, name: &str, func: MethodFn) {
        self.methods
            .entry(name.to_string())
            .or_insert_with(|| MethodChain::new(name))
            .push_override(MethodImpl::new(module, func));
    }
}

fn automatic_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::integer(ID_FIELD).readonly().no_copy(),
        FieldDescriptor::datetime(CREATE_DATE).readonly().no_copy(),
        FieldDescriptor::datetime(WRITE_DATE).readonly().no_copy(),
        FieldDescriptor::datetime(LAST_UPDATE)
            .readonly()
            .computed(&[WRITE_DATE, CREATE_DATE], |rs| {
                let written = rs.get(WRITE_DATE)?;
                if written.is_null() {
                    rs.get(CREATE_DATE)
                } else {
                    Ok(written)
                }
            }),
        FieldDescriptor::char(DISPLAY_NAME)
            .readonly()
            .computed(&[], |rs| match rs.model().name_field() {
                Some(field) => rs.get(field),
                None => Ok(Value::from(format!("{}({})", rs.model().name(), rs.id()?))),
            }),
    ]
}

///
/// RegistryBuilder
///
/// Bootstrap-time registration surface. Modules select themselves with
/// `module`, then `declare` new models or `extend` existing ones. Errors
/// are collected and the first one is reported by `finalize`.
///

pub struct RegistryBuilder {
    module: String,
    models: IndexMap<String, ModelDraft>,
    errors: Vec<RegistryError>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            module: BASE_MODULE.to_string(),
            models: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    /// Attribute subsequent registrations to `name`.
    pub fn module(&mut self, name: &str) -> &mut Self {
        self.module = name.to_string();
        self
    }

    /// Declare a new model owned by the current module.
    pub fn declare(&mut self, name: &str) -> ModelBuilder<'_> {
        if self.models.contains_key(name) {
            self.errors
                .push(RegistryError::DuplicateModel(name.to_string()));
            return ModelBuilder {
                registry: self,
                target: None,
            };
        }

        let draft = ModelDraft::new(name, &self.module);
        self.models.insert(name.to_string(), draft);

        ModelBuilder {
            registry: self,
            target: Some(name.to_string()),
        }
    }

    /// Extend a model declared by an earlier module.
    pub fn extend(&mut self, name: &str) -> ModelBuilder<'_> {
        let target = if self.models.contains_key(name) {
            Some(name.to_string())
        } else {
            self.errors
                .push(RegistryError::UnknownModel(name.to_string()));
            None
        };

        ModelBuilder {
            registry: self,
            target,
        }
    }

    /// Freeze every model: resolve relations, build the dependency graph,
    /// and reject invalid declarations.
    pub fn finalize(mut self) -> Result<Registry, InternalError> {
        if !self.errors.is_empty() {
            return Err(self.errors.swap_remove(0).into());
        }

        for draft in self.models.values_mut() {
            if draft.name_field.is_none() && draft.fields.contains_key(DEFAULT_NAME_FIELD) {
                draft.name_field = Some(DEFAULT_NAME_FIELD.to_string());
            }
            if let Some(name_field) = draft.name_field.clone()
                && let Some(display) = draft.fields.get_mut(DISPLAY_NAME)
                && let FieldSource::Computed { depends, .. } = &mut display.source
            {
                *depends = vec![name_field];
            }
        }

        self.validate_relations()?;
        self.resolve_related_types()?;

        let tables: IndexMap<String, IndexMap<String, FieldDescriptor>> = self
            .models
            .iter()
            .map(|(name, draft)| (name.clone(), draft.fields.clone()))
            .collect();
        let mut graph = graph::build(&tables)?;

        let models = self
            .models
            .into_iter()
            .map(|(name, draft)| {
                let model = Model {
                    table: name.to_case(Case::Snake),
                    compute_order: graph.compute_order.remove(&name).unwrap_or_default(),
                    dependents: graph.dependents.remove(&name).unwrap_or_default(),
                    inverses: graph.inverses.remove(&name).unwrap_or_default(),
                    name: draft.name,
                    module: draft.module,
                    fields: draft.fields,
                    methods: draft.methods,
                    name_field: draft.name_field,
                    hierarchy_field: draft.hierarchy_field,
                };
                (name, model)
            })
            .collect();

        Ok(Registry::from_models(models))
    }

    fn validate_relations(&mut self) -> Result<(), RegistryError> {
        let known: Vec<String> = self.models.keys().cloned().collect();

        for draft in self.models.values_mut() {
            let table = draft.name.to_case(Case::Snake);

            for field in draft.fields.values_mut() {
                let invalid = |reason: String| RegistryError::InvalidRelation {
                    model: draft.name.clone(),
                    field: field.name.clone(),
                    reason,
                };
                if !field.field_type.is_relation() {
                    continue;
                }
                let target = field.relation.clone().unwrap_or_default();
                if !known.contains(&target) {
                    return Err(invalid(format!("target model '{target}' is not declared")));
                }
                if field.field_type == FieldType::Many2Many {
                    let link = format!("{table}_{}_rel", field.name.to_case(Case::Snake));
                    field.link = Some(link);
                }
            }

            if let Some(parent) = &draft.hierarchy_field {
                let ok = draft.fields.get(parent).is_some_and(|f| {
                    f.field_type == FieldType::Many2One
                        && f.relation.as_deref() == Some(draft.name.as_str())
                });
                if !ok {
                    return Err(RegistryError::InvalidRelation {
                        model: draft.name.clone(),
                        field: parent.clone(),
                        reason: "hierarchy field must be a many2one to its own model".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    // A related field takes the type and target of the field its path ends on.
    fn resolve_related_types(&mut self) -> Result<(), RegistryError> {
        let mut resolved = Vec::new();

        for (model_name, draft) in &self.models {
            for field in draft.fields.values() {
                let FieldSource::Related { path } = &field.source else {
                    continue;
                };
                let mut current = model_name.as_str();
                let mut end: Option<&FieldDescriptor> = None;
                for segment in path.split('.') {
                    let step = self
                        .models
                        .get(current)
                        .and_then(|m| m.fields.get(segment))
                        .ok_or_else(|| RegistryError::UnknownField {
                            model: current.to_string(),
                            field: segment.to_string(),
                        })?;
                    current = step.relation.as_deref().unwrap_or_default();
                    end = Some(step);
                }
                if let Some(end) = end {
                    resolved.push((
                        model_name.clone(),
                        field.name.clone(),
                        end.field_type,
                        end.relation.clone(),
                    ));
                }
            }
        }

        for (model, field, field_type, relation) in resolved {
            if let Some(f) = self
                .models
                .get_mut(&model)
                .and_then(|d| d.fields.get_mut(&field))
            {
                f.field_type = field_type;
                f.relation = relation;
            }
        }

        Ok(())
    }
}

///
/// ModelBuilder
///
/// Registration handle for one model within the current module. Calls on a
/// handle whose `declare` / `extend` failed are ignored; the failure is
/// reported at `finalize`.
///

pub struct ModelBuilder<'a> {
    registry: &'a mut RegistryBuilder,
    target: Option<String>,
}

impl ModelBuilder<'_> {
    fn draft(&mut self) -> Option<(&mut ModelDraft, &str, &mut Vec<RegistryError>)> {
        let target = self.target.as_deref()?;
        let RegistryBuilder {
            module,
            models,
            errors,
        } = &mut *self.registry;

        models
            .get_mut(target)
            .map(|draft| (draft, module.as_str(), errors))
    }

    /// Add a field. A later module re-declaring a field replaces it.
    pub fn field(&mut self, field: FieldDescriptor) -> &mut Self {
        if let Some((draft, module, errors)) = self.draft() {
            let name = field.name.clone();
            let owner = draft.field_modules.get(&name).map(String::as_str);
            if AUTOMATIC_FIELDS.contains(&name.as_str()) || owner == Some(module) {
                errors.push(RegistryError::DuplicateField {
                    model: draft.name.clone(),
                    field: name,
                });
                return self;
            }

            draft.field_modules.insert(name.clone(), module.to_string());
            draft.fields.insert(name, field);
        }
        self
    }

    /// Push an implementation on top of `name`'s override chain.
    pub fn method(
        &mut self,
        name: &str,
        func: impl Fn(&RecordCollection, &Next<'_>, Vec<Payload>) -> Result<Payload, InternalError>
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        if let Some((draft, module, _)) = self.draft() {
            draft.add_method(module, name, Arc::new(func));
        }
        self
    }

    /// Declare the self-referential many2one used by `check_recursion`.
    pub fn hierarchy(&mut self, field: &str) -> &mut Self {
        if let Some((draft, _, _)) = self.draft() {
            draft.hierarchy_field = Some(field.to_string());
        }
        self
    }

    /// Field rendered as the record's `DisplayName`.
    pub fn name_field(&mut self, field: &str) -> &mut Self {
        if let Some((draft, _, _)) = self.draft() {
            draft.name_field = Some(field.to_string());
        }
        self
    }

    /// Override the default of an already-registered field.
    pub fn default(&mut self, field: &str, value: DefaultValue) -> &mut Self {
        if let Some((draft, _, errors)) = self.draft() {
            match draft.fields.get_mut(field) {
                Some(descriptor) => descriptor.default = Some(value),
                None => errors.push(RegistryError::UnknownField {
                    model: draft.name.clone(),
                    field: field.to_string(),
                }),
            }
        }
        self
    }
}
