//! Base links installed at the bottom of every model's override chains.
//!
//! Each link decodes its positional `Payload` arguments, runs the built-in
//! behaviour, and encodes the result. Typed collection methods call through
//! the same chains, so overrides apply to both call styles.

use crate::{
    collection::{
        FieldsGetArgs, OnchangeParams, RecordCollection, access, crud, introspect, onchange,
        recursion,
    },
    db::search::Condition,
    dispatch::{Args, Next, Payload},
    error::InternalError,
    registry::builder::{BASE_MODULE, DISPLAY_NAME, ModelDraft},
    value::{FieldMap, Value},
};
use std::sync::Arc;

pub(crate) const CREATE: &str = "Create";
pub(crate) const WRITE: &str = "Write";
pub(crate) const COPY: &str = "Copy";
pub(crate) const UNLINK: &str = "Unlink";
pub(crate) const READ: &str = "Read";
pub(crate) const LOAD: &str = "Load";
pub(crate) const FIELD_GET: &str = "FieldGet";
pub(crate) const FIELDS_GET: &str = "FieldsGet";
pub(crate) const DEFAULT_GET: &str = "DefaultGet";
pub(crate) const ONCHANGE: &str = "Onchange";
pub(crate) const CHECK_RECURSION: &str = "CheckRecursion";
pub(crate) const NAME_GET: &str = "NameGet";
pub(crate) const BROWSE: &str = "Browse";
pub(crate) const SEARCH_ALL: &str = "SearchAll";
pub(crate) const SEARCH_COUNT: &str = "SearchCount";
pub(crate) const UNION: &str = "Union";
pub(crate) const SUBTRACT: &str = "Subtract";
pub(crate) const INTERSECT: &str = "Intersect";
pub(crate) const EQUALS: &str = "Equals";
pub(crate) const CARTESIAN_PRODUCT: &str = "CartesianProduct";

pub(super) fn install(draft: &mut ModelDraft) {
    draft.add_method(BASE_MODULE, CREATE, Arc::new(create));
    draft.add_method(BASE_MODULE, WRITE, Arc::new(write));
    draft.add_method(BASE_MODULE, COPY, Arc::new(copy));
    draft.add_method(BASE_MODULE, UNLINK, Arc::new(unlink));
    draft.add_method(BASE_MODULE, READ, Arc::new(read));
    draft.add_method(BASE_MODULE, LOAD, Arc::new(load));
    draft.add_method(BASE_MODULE, FIELD_GET, Arc::new(field_get));
    draft.add_method(BASE_MODULE, FIELDS_GET, Arc::new(fields_get));
    draft.add_method(BASE_MODULE, DEFAULT_GET, Arc::new(default_get));
    draft.add_method(BASE_MODULE, ONCHANGE, Arc::new(onchange));
    draft.add_method(BASE_MODULE, CHECK_RECURSION, Arc::new(check_recursion));
    draft.add_method(BASE_MODULE, NAME_GET, Arc::new(name_get));
    draft.add_method(BASE_MODULE, BROWSE, Arc::new(browse));
    draft.add_method(BASE_MODULE, SEARCH_ALL, Arc::new(search_all));
    draft.add_method(BASE_MODULE, SEARCH_COUNT, Arc::new(search_count));
    draft.add_method(BASE_MODULE, UNION, Arc::new(union));
    draft.add_method(BASE_MODULE, SUBTRACT, Arc::new(subtract));
    draft.add_method(BASE_MODULE, INTERSECT, Arc::new(intersect));
    draft.add_method(BASE_MODULE, EQUALS, Arc::new(equals));
    draft.add_method(BASE_MODULE, CARTESIAN_PRODUCT, Arc::new(cartesian_product));
}

// ---------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------

fn create(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let values = Args::new(CREATE, args).map()?;

    crud::create(rs, values).map(Payload::from)
}

fn write(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let values = Args::new(WRITE, args).map()?;
    crud::write(rs, &values)?;

    Ok(Payload::from(true))
}

fn copy(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let overrides = Args::new(COPY, args).map()?;

    crud::copy(rs, overrides).map(Payload::from)
}

fn unlink(rs: &RecordCollection, _: &Next<'_>, _: Vec<Payload>) -> Result<Payload, InternalError> {
    let removed = crud::unlink(rs)?;

    Ok(Payload::from(Value::Int(
        i64::try_from(removed).unwrap_or(i64::MAX),
    )))
}

// ---------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------

fn read(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let fields = Args::new(READ, args).names()?;
    let rows = access::read(rs, &fields)?;

    Ok(Payload::List(rows.into_iter().map(Payload::Map).collect()))
}

fn load(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let fields = Args::new(LOAD, args).names()?;
    access::load(rs, &fields)?;

    Ok(Payload::Records(rs.clone()))
}

fn name_get(rs: &RecordCollection, _: &Next<'_>, _: Vec<Payload>) -> Result<Payload, InternalError> {
    rs.get(DISPLAY_NAME).map(Payload::Value)
}

// ---------------------------------------------------------------------
// Introspection and onchange
// ---------------------------------------------------------------------

fn field_get(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let name = Args::new(FIELD_GET, args).name()?;
    let info = introspect::field_get(rs, &name)?;

    Ok(Payload::Map(info.to_field_map()))
}

fn fields_get(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let fields = Args::new(FIELDS_GET, args).names()?;
    let infos = introspect::fields_get(rs, &FieldsGetArgs { fields })?;

    Ok(Payload::Map(
        infos
            .into_iter()
            .map(|(name, info)| (name, Value::Map(info.to_field_map())))
            .collect::<FieldMap>(),
    ))
}

fn default_get(
    rs: &RecordCollection,
    _: &Next<'_>,
    _: Vec<Payload>,
) -> Result<Payload, InternalError> {
    onchange::default_get(rs).map(Payload::Map)
}

fn onchange(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let params = OnchangeParams::from_map(Args::new(ONCHANGE, args).map()?)?;
    let result = onchange::onchange(rs, &params)?;

    Ok(Payload::Map(result.to_field_map()))
}

fn check_recursion(
    rs: &RecordCollection,
    _: &Next<'_>,
    _: Vec<Payload>,
) -> Result<Payload, InternalError> {
    recursion::check_recursion(rs).map(Payload::from)
}

// ---------------------------------------------------------------------
// Searching
// ---------------------------------------------------------------------

fn browse(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let ids = Args::new(BROWSE, args).ids()?;

    Ok(Payload::Records(rs.browse(&ids)))
}

fn search_all(
    rs: &RecordCollection,
    _: &Next<'_>,
    _: Vec<Payload>,
) -> Result<Payload, InternalError> {
    rs.search_all().map(Payload::Records)
}

fn search_count(
    rs: &RecordCollection,
    _: &Next<'_>,
    _: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let count = rs.search_count(&Condition::all())?;

    Ok(Payload::from(Value::Int(
        i64::try_from(count).unwrap_or(i64::MAX),
    )))
}

// ---------------------------------------------------------------------
// Set algebra
// ---------------------------------------------------------------------

fn union(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let mut out = rs.clone();
    for other in Args::new(UNION, args).rest_records()? {
        out = out.union(&other)?;
    }

    Ok(Payload::Records(out))
}

fn subtract(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let other = Args::new(SUBTRACT, args).records()?;

    rs.subtract(&other).map(Payload::Records)
}

fn intersect(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let other = Args::new(INTERSECT, args).records()?;

    rs.intersect(&other).map(Payload::Records)
}

fn equals(rs: &RecordCollection, _: &Next<'_>, args: Vec<Payload>) -> Result<Payload, InternalError> {
    let other = Args::new(EQUALS, args).records()?;

    Ok(Payload::from(rs.equals(&other)))
}

fn cartesian_product(
    rs: &RecordCollection,
    _: &Next<'_>,
    args: Vec<Payload>,
) -> Result<Payload, InternalError> {
    let others = Args::new(CARTESIAN_PRODUCT, args).rest_records()?;
    let tuples = rs.cartesian_product(&others)?;

    Ok(Payload::List(tuples.into_iter().map(Payload::Records).collect()))
}
