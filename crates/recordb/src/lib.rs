//! ## Crate layout
//! - `core`: runtime record models, registry and dispatch, environments,
//!   record collections, the onchange engine, and observability.
//! - `error`: the public error taxonomy callers match on.
//!
//! The `prelude` module mirrors the runtime surface used by model modules
//! and request handlers.

pub use recordb_core as core;

pub mod error;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use core::field_map;
pub use error::{Error, ErrorKind, ErrorOrigin};

/// Result alias over the public error type.
pub type Result<T> = std::result::Result<T, Error>;

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::core::{
        collection::{FieldsGetArgs, OnchangeParams, OnchangeResult, OnchangeTrace, RecordCollection},
        db::{Database, search::Condition},
        dispatch::{Next, Payload},
        env::{
            Environment,
            access::{AccessOp, AccessPolicy},
        },
        field_map,
        model::{DefaultValue, FieldDescriptor, FieldInfo, FieldType, Model},
        registry::Registry,
        value::{FieldMap, RecordId, Value},
    };
    pub use crate::error::{Error, ErrorKind};
    pub use serde::{Deserialize, Serialize};
}
