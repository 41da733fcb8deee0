//! Core runtime for recordb: record models, the override-chain registry,
//! environments with per-request caches, lazy record collections, and the
//! onchange engine.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod collection;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod model;
pub mod obs;
pub mod registry;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Principal id that bypasses the access policy.
pub const SUPERUSER_ID: u64 = 1;

/// Name of the automatic primary key field.
pub const ID_FIELD: &str = "ID";

/// Key under which `Read` reports the record identifier.
pub const READ_ID_KEY: &str = "id";

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No stores, sinks, or builders' internals are re-exported here.
///

pub mod prelude {
    pub use crate::{
        collection::RecordCollection,
        db::search::Condition,
        dispatch::Payload,
        env::Environment,
        field_map,
        model::{FieldType, Model},
        registry::Registry,
        value::{FieldMap, RecordId, Value},
    };
}
