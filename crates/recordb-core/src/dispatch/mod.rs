//! Method dispatch: the tagged call payload and override-chain plumbing.

mod chain;

pub use chain::{MethodChain, MethodFn, MethodImpl, Next};

use crate::{
    collection::RecordCollection,
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::{FieldMap, RecordId, Value},
};
use thiserror::Error as ThisError;

///
/// DispatchError
///

#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("method '{method}' argument {index}: expected {expected}, found {found}")]
    InvalidArgument {
        method: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("method '{method}' on model '{model}' forwarded past the end of its chain")]
    ChainExhausted { model: String, method: String },
}

impl From<DispatchError> for InternalError {
    fn from(err: DispatchError) -> Self {
        let class = match err {
            DispatchError::InvalidArgument { .. } => ErrorClass::InvalidArgument,
            DispatchError::ChainExhausted { .. } => ErrorClass::NotFound,
        };

        Self::with_detail(class, ErrorOrigin::Dispatch, ErrorDetail::Dispatch(err))
    }
}

///
/// Payload
///
/// Argument / result carried across a dynamic method call.
///

#[derive(Clone, Debug, Default)]
pub enum Payload {
    #[default]
    Unit,
    Value(Value),
    Records(RecordCollection),
    Map(FieldMap),
    List(Vec<Self>),
}

impl Payload {
    /// Field-name list argument.
    #[must_use]
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::List(
            names
                .iter()
                .map(|n| Self::Value(Value::from(n.as_ref())))
                .collect(),
        )
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Value(_) => "value",
            Self::Records(_) => "records",
            Self::Map(_) => "map",
            Self::List(_) => "list",
        }
    }

    pub fn into_records(self) -> Result<RecordCollection, InternalError> {
        match self {
            Self::Records(rs) => Ok(rs),
            other => Err(other.mismatch("records")),
        }
    }

    pub fn into_map(self) -> Result<FieldMap, InternalError> {
        match self {
            Self::Map(map) | Self::Value(Value::Map(map)) => Ok(map),
            other => Err(other.mismatch("map")),
        }
    }

    pub fn into_value(self) -> Result<Value, InternalError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Map(map) => Ok(Value::Map(map)),
            Self::Records(rs) => Ok(Value::Ids(rs.ids().to_vec())),
            Self::Unit => Ok(Value::Null),
            other @ Self::List(_) => Err(other.mismatch("value")),
        }
    }

    pub fn into_bool(self) -> Result<bool, InternalError> {
        match self {
            Self::Value(Value::Bool(b)) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn into_list(self) -> Result<Vec<Self>, InternalError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    /// Field-name list; text values only.
    pub fn into_names(self) -> Result<Vec<String>, InternalError> {
        let items = match self {
            Self::List(items) => items,
            Self::Unit => return Ok(Vec::new()),
            other => return Err(other.mismatch("name list")),
        };

        items
            .into_iter()
            .map(|item| match item {
                Self::Value(Value::Text(name)) => Ok(name),
                other => Err(other.mismatch("name")),
            })
            .collect()
    }

    pub fn into_maps(self) -> Result<Vec<FieldMap>, InternalError> {
        self.into_list()?.into_iter().map(Self::into_map).collect()
    }

    fn mismatch(&self, expected: &'static str) -> InternalError {
        InternalError::new(
            ErrorClass::InvalidArgument,
            ErrorOrigin::Dispatch,
            format!("payload mismatch: expected {expected}, found {}", self.kind()),
        )
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<FieldMap> for Payload {
    fn from(map: FieldMap) -> Self {
        Self::Map(map)
    }
}

impl From<RecordCollection> for Payload {
    fn from(rs: RecordCollection) -> Self {
        Self::Records(rs)
    }
}

impl From<Vec<RecordId>> for Payload {
    fn from(ids: Vec<RecordId>) -> Self {
        Self::Value(Value::Ids(ids))
    }
}

///
/// Args
///
/// Positional argument reader used by chain links.
///

pub struct Args {
    method: &'static str,
    items: std::vec::IntoIter<Payload>,
    index: usize,
}

impl Args {
    #[must_use]
    pub fn new(method: &'static str, args: Vec<Payload>) -> Self {
        Self {
            method,
            items: args.into_iter(),
            index: 0,
        }
    }

    fn next_item(&mut self) -> Payload {
        self.index += 1;
        self.items.next().unwrap_or_default()
    }

    fn invalid(&self, expected: &'static str, found: &Payload) -> InternalError {
        DispatchError::InvalidArgument {
            method: self.method.to_string(),
            index: self.index - 1,
            expected,
            found: found.kind(),
        }
        .into()
    }

    /// Next argument as a field map; a missing argument reads as empty.
    pub fn map(&mut self) -> Result<FieldMap, InternalError> {
        match self.next_item() {
            Payload::Map(map) | Payload::Value(Value::Map(map)) => Ok(map),
            Payload::Unit => Ok(FieldMap::new()),
            other => Err(self.invalid("map", &other)),
        }
    }

    /// Next argument as a field-name list; a missing argument reads as empty.
    pub fn names(&mut self) -> Result<Vec<String>, InternalError> {
        match self.next_item() {
            Payload::Value(Value::Text(name)) => Ok(vec![name]),
            item @ (Payload::List(_) | Payload::Unit) => item.into_names(),
            other => Err(self.invalid("name list", &other)),
        }
    }

    /// Next argument as a single field name.
    pub fn name(&mut self) -> Result<String, InternalError> {
        match self.next_item() {
            Payload::Value(Value::Text(name)) => Ok(name),
            other => Err(self.invalid("name", &other)),
        }
    }

    /// Next argument as a record collection.
    pub fn records(&mut self) -> Result<RecordCollection, InternalError> {
        match self.next_item() {
            Payload::Records(rs) => Ok(rs),
            other => Err(self.invalid("records", &other)),
        }
    }

    /// Remaining arguments as record collections.
    pub fn rest_records(&mut self) -> Result<Vec<RecordCollection>, InternalError> {
        let remaining: Vec<Payload> = self.items.by_ref().collect();
        let mut out = Vec::with_capacity(remaining.len());
        for item in remaining {
            self.index += 1;
            match item {
                Payload::Records(rs) => out.push(rs),
                other => return Err(self.invalid("records", &other)),
            }
        }

        Ok(out)
    }

    /// Next argument as an id list.
    pub fn ids(&mut self) -> Result<Vec<RecordId>, InternalError> {
        match self.next_item() {
            Payload::Value(Value::Ids(ids)) => Ok(ids),
            Payload::Records(rs) => Ok(rs.ids().to_vec()),
            other => Err(self.invalid("ids", &other)),
        }
    }

    /// Next argument as a raw value.
    pub fn value(&mut self) -> Result<Value, InternalError> {
        match self.next_item() {
            Payload::Value(value) => Ok(value),
            Payload::Unit => Ok(Value::Null),
            other => Err(self.invalid("value", &other)),
        }
    }
}
