use crate::{
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::{FieldMap, RecordId},
};
use derive_more::{Deref, DerefMut};
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};
use thiserror::Error as ThisError;

/// Stored column values of one record. The identifier is never part of a row.
pub type Row = FieldMap;

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("unknown storage relation '{0}'")]
    UnknownTable(String),

    #[error("storage relation '{table}' is corrupt: {reason}")]
    Corrupt { table: String, reason: String },
}

impl From<StoreError> for InternalError {
    fn from(err: StoreError) -> Self {
        Self::with_detail(ErrorClass::Internal, ErrorOrigin::Store, ErrorDetail::Store(err))
    }
}

///
/// LinkSide
///
/// Which end of a link relation a lookup keys on.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkSide {
    Left,
    Right,
}

///
/// Storage
///
/// Relational backend seam. Each model owns one table; each many2many field
/// owns one link relation of `(left, right)` id pairs.
///

pub trait Storage {
    fn ensure_table(&mut self, table: &str);

    fn ensure_link(&mut self, relation: &str);

    /// Insert a row and assign it the next identifier.
    fn insert(&mut self, table: &str, row: Row) -> Result<RecordId, StoreError>;

    /// Rows for `ids` that exist, restricted to `columns`; ids with no row are
    /// omitted.
    fn fetch(
        &self,
        table: &str,
        ids: &[RecordId],
        columns: &[&str],
    ) -> Result<Vec<(RecordId, Row)>, StoreError>;

    /// Overlay `values` onto every row in `ids`. Returns the number of rows
    /// touched.
    fn update(&mut self, table: &str, ids: &[RecordId], values: &Row) -> Result<usize, StoreError>;

    fn delete(&mut self, table: &str, ids: &[RecordId]) -> Result<usize, StoreError>;

    /// Full rows accepted by `filter`, in identifier order.
    fn select(
        &self,
        table: &str,
        filter: &dyn Fn(RecordId, &Row) -> bool,
    ) -> Result<Vec<(RecordId, Row)>, StoreError>;

    fn count(&self, table: &str) -> Result<usize, StoreError>;

    /// Link pairs whose `side` id is in `ids`, as `(left, right)`.
    fn links(
        &self,
        relation: &str,
        side: LinkSide,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, RecordId)>, StoreError>;

    /// Replace every pair of `left` with `(left, right)` for each of `rights`.
    fn replace_links(
        &mut self,
        relation: &str,
        left: RecordId,
        rights: &[RecordId],
    ) -> Result<(), StoreError>;

    fn remove_links(
        &mut self,
        relation: &str,
        side: LinkSide,
        ids: &[RecordId],
    ) -> Result<(), StoreError>;

    /// Independent copy used as a transaction's working set. Writes to the
    /// copy never reach the original.
    fn fork(&self) -> Box<dyn Storage>;
}

///
/// Table
///

#[derive(Clone, Debug, Default, Deref, DerefMut)]
pub struct Table {
    next_id: u64,
    #[deref]
    #[deref_mut]
    rows: BTreeMap<RecordId, Row>,
}

impl Table {
    fn allocate(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }
}

type LinkSet = BTreeSet<(RecordId, RecordId)>;

///
/// MemoryStore
///
/// In-process `Storage` backed by ordered maps. Tables and link relations
/// are shared between forks and copied on first write, so forking costs one
/// pointer per relation.
///

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Rc<Table>>,
    links: BTreeMap<String, Rc<LinkSet>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table: &str) -> Result<&Table, StoreError> {
        self.tables
            .get(table)
            .map(|shared| &**shared)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(table)
            .map(Rc::make_mut)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn link(&self, relation: &str) -> Result<&LinkSet, StoreError> {
        self.links
            .get(relation)
            .map(|shared| &**shared)
            .ok_or_else(|| StoreError::UnknownTable(relation.to_string()))
    }

    fn link_mut(&mut self, relation: &str) -> Result<&mut LinkSet, StoreError> {
        self.links
            .get_mut(relation)
            .map(Rc::make_mut)
            .ok_or_else(|| StoreError::UnknownTable(relation.to_string()))
    }
}

impl Storage for MemoryStore {
    fn ensure_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    fn ensure_link(&mut self, relation: &str) {
        self.links.entry(relation.to_string()).or_default();
    }

    fn insert(&mut self, table: &str, row: Row) -> Result<RecordId, StoreError> {
        let table = self.table_mut(table)?;
        let id = table.allocate();
        table.insert(id, row);

        Ok(id)
    }

    fn fetch(
        &self,
        table: &str,
        ids: &[RecordId],
        columns: &[&str],
    ) -> Result<Vec<(RecordId, Row)>, StoreError> {
        let table = self.table(table)?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                table
                    .get(id)
                    .map(|row| (*id, row.filtered(|name| columns.contains(&name))))
            })
            .collect())
    }

    fn update(&mut self, table: &str, ids: &[RecordId], values: &Row) -> Result<usize, StoreError> {
        let table = self.table_mut(table)?;
        let mut touched = 0;
        for id in ids {
            if let Some(row) = table.get_mut(id) {
                row.merge(values.clone());
                touched += 1;
            }
        }

        Ok(touched)
    }

    fn delete(&mut self, table: &str, ids: &[RecordId]) -> Result<usize, StoreError> {
        let table = self.table_mut(table)?;

        Ok(ids.iter().filter(|id| table.remove(id).is_some()).count())
    }

    fn select(
        &self,
        table: &str,
        filter: &dyn Fn(RecordId, &Row) -> bool,
    ) -> Result<Vec<(RecordId, Row)>, StoreError> {
        Ok(self
            .table(table)?
            .iter()
            .filter(|(id, row)| filter(**id, row))
            .map(|(id, row)| (*id, row.clone()))
            .collect())
    }

    fn count(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.table(table)?.len())
    }

    fn links(
        &self,
        relation: &str,
        side: LinkSide,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, RecordId)>, StoreError> {
        let wanted: BTreeSet<RecordId> = ids.iter().copied().collect();

        Ok(self
            .link(relation)?
            .iter()
            .filter(|(left, right)| match side {
                LinkSide::Left => wanted.contains(left),
                LinkSide::Right => wanted.contains(right),
            })
            .copied()
            .collect())
    }

    fn replace_links(
        &mut self,
        relation: &str,
        left: RecordId,
        rights: &[RecordId],
    ) -> Result<(), StoreError> {
        let pairs = self.link_mut(relation)?;
        pairs.retain(|(l, _)| *l != left);
        pairs.extend(rights.iter().map(|right| (left, *right)));

        Ok(())
    }

    fn remove_links(
        &mut self,
        relation: &str,
        side: LinkSide,
        ids: &[RecordId],
    ) -> Result<(), StoreError> {
        let pairs = self.link_mut(relation)?;
        pairs.retain(|(left, right)| match side {
            LinkSide::Left => !ids.contains(left),
            LinkSide::Right => !ids.contains(right),
        });

        Ok(())
    }

    fn fork(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.ensure_table("user");
        store.ensure_link("user_tags_rel");
        store
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut store = store();
        let a = store.insert("user", Row::new()).expect("insert a");
        let b = store.insert("user", Row::new()).expect("insert b");

        assert_eq!(a, RecordId(1));
        assert_eq!(b, RecordId(2));
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let mut store = store();
        let a = store.insert("user", Row::new()).expect("insert a");
        store.delete("user", &[a]).expect("delete a");
        let b = store.insert("user", Row::new()).expect("insert b");

        assert_ne!(a, b);
        assert_eq!(store.count("user").expect("count"), 1);
    }

    #[test]
    fn fetch_projects_columns_and_skips_missing_rows() {
        let mut store = store();
        let id = store
            .insert("user", Row::new().with("Name", "John").with("Age", 24))
            .expect("insert");

        let rows = store
            .fetch("user", &[id, RecordId(99)], &["Name"])
            .expect("fetch");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.value("Name"), &Value::from("John"));
        assert!(rows[0].1.get("Age").is_none());
    }

    #[test]
    fn unknown_table_is_an_error() {
        let err = MemoryStore::new()
            .count("ghost")
            .expect_err("ghost table does not exist");

        assert!(matches!(err, StoreError::UnknownTable(name) if name == "ghost"));
    }

    #[test]
    fn replace_links_swaps_only_the_left_side() {
        let mut store = store();
        store
            .replace_links("user_tags_rel", RecordId(1), &[RecordId(10), RecordId(11)])
            .expect("link 1");
        store
            .replace_links("user_tags_rel", RecordId(2), &[RecordId(10)])
            .expect("link 2");
        store
            .replace_links("user_tags_rel", RecordId(1), &[RecordId(12)])
            .expect("relink 1");

        let pairs = store
            .links("user_tags_rel", LinkSide::Right, &[RecordId(10)])
            .expect("links");
        assert_eq!(pairs, vec![(RecordId(2), RecordId(10))]);
    }

    #[test]
    fn fork_is_independent() {
        let mut store = store();
        let fork = store.fork();
        store.insert("user", Row::new()).expect("insert");

        assert_eq!(fork.count("user").expect("count fork"), 0);
    }

    #[test]
    fn fork_copies_only_written_relations() {
        let mut store = store();
        store.ensure_table("post");
        store.insert("user", Row::new().with("Name", "John")).expect("insert");

        let mut fork = store.clone();
        assert!(Rc::ptr_eq(&store.tables["user"], &fork.tables["user"]));

        fork.insert("user", Row::new()).expect("insert in fork");
        fork.replace_links("user_tags_rel", RecordId(1), &[RecordId(7)])
            .expect("link in fork");

        assert!(!Rc::ptr_eq(&store.tables["user"], &fork.tables["user"]));
        assert!(Rc::ptr_eq(&store.tables["post"], &fork.tables["post"]));
        assert_eq!(store.count("user").expect("count"), 1);
        assert_eq!(fork.count("user").expect("count fork"), 2);
        assert!(store.links["user_tags_rel"].is_empty());
    }
}
