use crate::{collection::RecordCollection, error::InternalError, value::RecordId};

/// Whether every record of `rs` sits on an acyclic parent chain.
///
/// Models without a hierarchy field are trivially acyclic. Each walk is
/// bounded by the number of stored records, so a cycle elsewhere on the
/// chain that does not pass through the start record cannot loop forever.
pub(crate) fn check_recursion(rs: &RecordCollection) -> Result<bool, InternalError> {
    let Some(parent) = rs.model().hierarchy_field() else {
        return Ok(true);
    };
    let bound = rs
        .env()
        .transaction()
        .read(|s| s.count(rs.model().table()))?;

    for record in rs.records() {
        let start = record.id()?;
        let mut current: Option<RecordId> = record.get(parent)?.first_id();
        let mut steps = 0usize;

        while let Some(id) = current {
            if id == start {
                tracing::debug!(model = rs.model().name(), id = start.get(), "parent cycle detected");
                return Ok(false);
            }
            steps += 1;
            if steps > bound {
                break;
            }
            current = rs.browse(&[id]).get(parent)?.first_id();
        }
    }

    Ok(true)
}
