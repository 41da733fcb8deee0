//! Runtime model definitions.
//!
//! A `Model` is the frozen, finalized form of everything the extension
//! modules registered for one record type: its fields, method chains and the
//! precomputed field-dependency graph. Models are only ever handed out by
//! reference from a finalized `Registry`.

mod field;
pub(crate) mod graph;

pub use field::{
    ComputeFn, DefaultFn, DefaultValue, FieldDescriptor, FieldInfo, FieldKind, FieldSource,
    FieldType, OnchangeFn,
};

use crate::{
    dispatch::MethodChain,
    error::InternalError,
    registry::RegistryError,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;

///
/// Dependent
///
/// One computed field that must be refreshed when the keyed field changes.
/// `path` lists the relation hops from `model` down to the changed field's
/// model; an empty path means both live on the same model.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dependent {
    pub model: String,
    pub field: String,
    pub path: Vec<String>,
}

///
/// InverseField
///
/// A one2many on `model` whose content is defined by a many2one column on
/// this model.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InverseField {
    pub model: String,
    pub field: String,
}

///
/// Model
///

#[derive(Debug)]
pub struct Model {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) module: String,
    pub(crate) fields: IndexMap<String, FieldDescriptor>,
    pub(crate) methods: IndexMap<String, MethodChain>,
    pub(crate) name_field: Option<String>,
    pub(crate) hierarchy_field: Option<String>,
    pub(crate) compute_order: Vec<String>,
    pub(crate) dependents: BTreeMap<String, Vec<Dependent>>,
    pub(crate) inverses: BTreeMap<String, Vec<InverseField>>,
}

impl Model {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage relation backing this model.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Module that declared the model.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Resolve a field; unknown names fail with `UnknownField`.
    pub fn field(&self, name: &str) -> Result<&FieldDescriptor, InternalError> {
        self.fields.get(name).ok_or_else(|| {
            RegistryError::UnknownField {
                model: self.name.clone(),
                field: name.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Fields persisted as columns of `table`.
    pub fn columns(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| f.is_column())
    }

    /// Resolve a method's override chain; unknown names fail with `UnknownMethod`.
    pub fn method(&self, name: &str) -> Result<&MethodChain, InternalError> {
        self.methods.get(name).ok_or_else(|| {
            RegistryError::UnknownMethod {
                model: self.name.clone(),
                method: name.to_string(),
            }
            .into()
        })
    }

    /// Method chains in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodChain> {
        self.methods.values()
    }

    /// Field used to render `DisplayName`, when the model has one.
    #[must_use]
    pub fn name_field(&self) -> Option<&str> {
        self.name_field.as_deref()
    }

    /// Self-referential many2one declared as the model's parent link.
    #[must_use]
    pub fn hierarchy_field(&self) -> Option<&str> {
        self.hierarchy_field.as_deref()
    }

    /// Computed fields of this model, dependencies first.
    #[must_use]
    pub fn compute_order(&self) -> &[String] {
        &self.compute_order
    }

    /// Computed fields (on any model) that read `field` of this model.
    #[must_use]
    pub fn dependents_of(&self, field: &str) -> &[Dependent] {
        self.dependents.get(field).map_or(&[], Vec::as_slice)
    }

    /// One2many fields backed by the many2one column `field`.
    #[must_use]
    pub fn inverses_of(&self, field: &str) -> &[InverseField] {
        self.inverses.get(field).map_or(&[], Vec::as_slice)
    }
}
