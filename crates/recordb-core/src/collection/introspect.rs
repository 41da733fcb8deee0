use crate::{
    collection::RecordCollection,
    error::InternalError,
    model::FieldInfo,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

///
/// FieldsGetArgs
///
/// Restricts `fields_get` to the named fields; empty means every field.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldsGetArgs {
    pub fields: Vec<String>,
}

impl FieldsGetArgs {
    #[must_use]
    pub fn only(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(ToString::to_string).collect(),
        }
    }
}

pub(crate) fn field_get(rs: &RecordCollection, name: &str) -> Result<FieldInfo, InternalError> {
    Ok(rs.model().field(name)?.info())
}

pub(crate) fn fields_get(
    rs: &RecordCollection,
    args: &FieldsGetArgs,
) -> Result<IndexMap<String, FieldInfo>, InternalError> {
    let model = rs.model();
    if args.fields.is_empty() {
        return Ok(model
            .fields()
            .map(|field| (field.name().to_string(), field.info()))
            .collect());
    }

    args.fields
        .iter()
        .map(|name| {
            let info = model.field(name)?.info();
            Ok((info.name.clone(), info))
        })
        .collect()
}
