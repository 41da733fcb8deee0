use crate::{
    collection::RecordCollection,
    env::Environment,
    error::InternalError,
    value::{FieldMap, Value},
};
use convert_case::{Case, Casing};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

///
/// ComputeFn
///
/// Produces a computed field's value for one record. The receiver is always
/// a single-record collection.
///

pub type ComputeFn = Arc<dyn Fn(&RecordCollection) -> Result<Value, InternalError> + Send + Sync>;

///
/// OnchangeFn
///
/// Onchange routine; reads the simulated record and returns the deltas it
/// wants applied.
///

pub type OnchangeFn =
    Arc<dyn Fn(&RecordCollection) -> Result<FieldMap, InternalError> + Send + Sync>;

///
/// DefaultFn
///

pub type DefaultFn = Arc<dyn Fn(&Environment) -> Value + Send + Sync>;

///
/// FieldType
///
/// Storage type of a field as reported by introspection.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
pub enum FieldType {
    #[display("char")]
    Char,
    #[display("text")]
    Text,
    #[display("integer")]
    Integer,
    #[display("float")]
    Float,
    #[display("boolean")]
    Boolean,
    #[display("datetime")]
    DateTime,
    #[display("many2one")]
    Many2One,
    #[display("one2many")]
    One2Many,
    #[display("many2many")]
    Many2Many,
}

impl FieldType {
    #[must_use]
    pub const fn is_relation(self) -> bool {
        matches!(self, Self::Many2One | Self::One2Many | Self::Many2Many)
    }

    #[must_use]
    pub const fn is_to_many(self) -> bool {
        matches!(self, Self::One2Many | Self::Many2Many)
    }
}

///
/// FieldKind
///
/// Coarse classification of where a field's value comes from.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    StoredScalar,
    ToOne,
    ToMany,
    Computed,
    Related,
}

///
/// DefaultValue
///

#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Dynamic(DefaultFn),
}

impl DefaultValue {
    pub(crate) fn resolve(&self, env: &Environment) -> Value {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(f) => f(env),
        }
    }
}

///
/// FieldSource
///

#[derive(Clone)]
pub enum FieldSource {
    Stored,
    Computed {
        compute: ComputeFn,
        depends: Vec<String>,
        stored: bool,
    },
    Related {
        path: String,
    },
}

///
/// FieldDescriptor
///
/// Declarative description of one model field. Built with the constructor
/// helpers below and registered through `ModelBuilder::field`.
///

#[derive(Clone)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) label: String,
    pub(crate) help: String,
    pub(crate) field_type: FieldType,
    pub(crate) relation: Option<String>,
    pub(crate) reverse: Option<String>,
    pub(crate) link: Option<String>,
    pub(crate) source: FieldSource,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) onchange: Option<OnchangeFn>,
    pub(crate) required: bool,
    pub(crate) readonly: bool,
    pub(crate) copyable: bool,
}

impl FieldDescriptor {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_case(Case::Title),
            help: String::new(),
            field_type,
            relation: None,
            reverse: None,
            link: None,
            source: FieldSource::Stored,
            default: None,
            onchange: None,
            required: false,
            readonly: false,
            copyable: true,
        }
    }

    // ---------------------------------------------------------------------
    // Constructors
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn char(name: &str) -> Self {
        Self::new(name, FieldType::Char)
    }

    #[must_use]
    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    #[must_use]
    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    #[must_use]
    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    #[must_use]
    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    #[must_use]
    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// To-one relation stored as a column holding the target id.
    #[must_use]
    pub fn many2one(name: &str, target: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2One);
        field.relation = Some(target.to_string());
        field
    }

    /// To-many relation read through the target's `reverse` many2one column.
    #[must_use]
    pub fn one2many(name: &str, target: &str, reverse: &str) -> Self {
        let mut field = Self::new(name, FieldType::One2Many);
        field.relation = Some(target.to_string());
        field.reverse = Some(reverse.to_string());
        field
    }

    /// To-many relation stored in an auxiliary link relation.
    #[must_use]
    pub fn many2many(name: &str, target: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2Many);
        field.relation = Some(target.to_string());
        field
    }

    /// Non-stored field mirroring the value at the end of a to-one path.
    /// Its type is resolved from the path's last field at finalization.
    #[must_use]
    pub fn related(name: &str, path: &str) -> Self {
        let mut field = Self::new(name, FieldType::Char);
        field.source = FieldSource::Related {
            path: path.to_string(),
        };
        field.readonly = true;
        field
    }

    // ---------------------------------------------------------------------
    // Modifiers
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    #[must_use]
    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Exclude this field from `Copy`.
    #[must_use]
    pub const fn no_copy(mut self) -> Self {
        self.copyable = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    #[must_use]
    pub fn default_fn(
        mut self,
        f: impl Fn(&Environment) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(DefaultValue::Dynamic(Arc::new(f)));
        self
    }

    /// Make the field computed from `depends` (dotted field paths).
    /// Computed fields are not stored unless `stored()` is also applied.
    #[must_use]
    pub fn computed(
        mut self,
        depends: &[&str],
        compute: impl Fn(&RecordCollection) -> Result<Value, InternalError> + Send + Sync + 'static,
    ) -> Self {
        self.source = FieldSource::Computed {
            compute: Arc::new(compute),
            depends: depends.iter().map(ToString::to_string).collect(),
            stored: false,
        };
        self
    }

    /// Persist a computed field; it is recomputed whenever a dependency is
    /// written.
    #[must_use]
    pub fn stored(mut self) -> Self {
        if let FieldSource::Computed { stored, .. } = &mut self.source {
            *stored = true;
        }
        self
    }

    #[must_use]
    pub fn onchange(
        mut self,
        routine: impl Fn(&RecordCollection) -> Result<FieldMap, InternalError> + Send + Sync + 'static,
    ) -> Self {
        self.onchange = Some(Arc::new(routine));
        self
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Target model of a relation field.
    #[must_use]
    pub fn relation(&self) -> Option<&str> {
        self.relation.as_deref()
    }

    /// Target-side many2one backing a one2many field.
    #[must_use]
    pub fn reverse(&self) -> Option<&str> {
        self.reverse.as_deref()
    }

    /// Link relation backing a many2many field.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    #[must_use]
    pub const fn is_copyable(&self) -> bool {
        self.copyable
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[must_use]
    pub const fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    #[must_use]
    pub const fn onchange_routine(&self) -> Option<&OnchangeFn> {
        self.onchange.as_ref()
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match &self.source {
            FieldSource::Computed { .. } => FieldKind::Computed,
            FieldSource::Related { .. } => FieldKind::Related,
            FieldSource::Stored => match self.field_type {
                FieldType::Many2One => FieldKind::ToOne,
                FieldType::One2Many | FieldType::Many2Many => FieldKind::ToMany,
                _ => FieldKind::StoredScalar,
            },
        }
    }

    /// Whether the value is persisted (plain stored fields and stored computes).
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        match &self.source {
            FieldSource::Stored => true,
            FieldSource::Computed { stored, .. } => *stored,
            FieldSource::Related { .. } => false,
        }
    }

    /// Whether the value lives in a column of the model's own relation.
    #[must_use]
    pub const fn is_column(&self) -> bool {
        self.is_stored() && !self.field_type.is_to_many()
    }

    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(
            self.source,
            FieldSource::Computed { .. } | FieldSource::Related { .. }
        )
    }

    /// Declared dependency paths; a related field depends on its path.
    #[must_use]
    pub fn depends(&self) -> Vec<&str> {
        match &self.source {
            FieldSource::Stored => Vec::new(),
            FieldSource::Computed { depends, .. } => depends.iter().map(String::as_str).collect(),
            FieldSource::Related { path } => vec![path.as_str()],
        }
    }

    #[must_use]
    pub fn info(&self) -> FieldInfo {
        FieldInfo {
            name: self.name.clone(),
            label: self.label.clone(),
            help: self.help.clone(),
            field_type: self.field_type,
            relation: self.relation.clone(),
            required: self.required,
            readonly: self.readonly,
            stored: self.is_stored(),
            depends: self.depends().into_iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("kind", &self.kind())
            .field("relation", &self.relation)
            .field("depends", &self.depends())
            .finish_non_exhaustive()
    }
}

///
/// FieldInfo
///
/// Introspection view of a field.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub label: String,
    pub help: String,
    pub field_type: FieldType,
    pub relation: Option<String>,
    pub required: bool,
    pub readonly: bool,
    pub stored: bool,
    pub depends: Vec<String>,
}

impl FieldInfo {
    /// Render as a field map for the dynamic call surface.
    #[must_use]
    pub fn to_field_map(&self) -> FieldMap {
        FieldMap::new()
            .with("name", self.name.as_str())
            .with("label", self.label.as_str())
            .with("help", self.help.as_str())
            .with("type", self.field_type.to_string())
            .with("relation", self.relation.clone())
            .with("required", self.required)
            .with("readonly", self.readonly)
            .with("stored", self.stored)
            .with(
                "depends",
                Value::List(self.depends.iter().map(|d| Value::from(d.as_str())).collect()),
            )
    }

    /// Parse the map produced by `to_field_map`.
    #[must_use]
    pub fn from_field_map(map: &FieldMap) -> Option<Self> {
        let text = |key: &str| map.value(key).as_text().map(ToString::to_string);
        let flag = |key: &str| map.value(key).as_bool().unwrap_or(false);
        let field_type = match map.value("type").as_text()? {
            "char" => FieldType::Char,
            "text" => FieldType::Text,
            "integer" => FieldType::Integer,
            "float" => FieldType::Float,
            "boolean" => FieldType::Boolean,
            "datetime" => FieldType::DateTime,
            "many2one" => FieldType::Many2One,
            "one2many" => FieldType::One2Many,
            "many2many" => FieldType::Many2Many,
            _ => return None,
        };
        let depends = match map.value("depends") {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_text().map(ToString::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            name: text("name")?,
            label: text("label").unwrap_or_default(),
            help: text("help").unwrap_or_default(),
            field_type,
            relation: text("relation"),
            required: flag("required"),
            readonly: flag("readonly"),
            stored: flag("stored"),
            depends,
        })
    }
}
