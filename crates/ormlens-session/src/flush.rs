//! Flush: writing pending and modified instances to storage.
//!
//! Rows are written table by table, parent tables first:
//! - INSERT for pending instances (one row per table of the mapper)
//! - UPDATE for persistent instances, modified columns only
//!
//! Foreign keys are copied from related instances just before the row that
//! holds them is written, so generated parent keys are available.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use ormlens_core::{
    ColumnRef, Error, RelationshipKind, Result, Row, SessionErrorKind, Table, TableRef, Value,
};
use ormlens_mapper::IdentityKey;

use crate::Session;
use crate::history::{History, Original};
use crate::instance::{AttrValue, Instance};
use crate::loading::column_value;

/// Orders tables for flush by foreign-key dependency.
///
/// Self-references are ignored; rows of one table are written in the order
/// their instances were added.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Table -> tables it depends on (has FK to), in registration order.
    dependencies: Vec<(String, Vec<String>)>,
}

impl FlushOrderer {
    /// Create a new flush orderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table's dependencies from its foreign keys.
    pub fn register_table(&mut self, table: &Table) {
        self.register(table.name(), table.referenced_tables());
    }

    /// Register a table's dependencies directly.
    pub fn register(&mut self, table: impl Into<String>, depends_on: Vec<String>) {
        let table = table.into();
        let depends_on = depends_on.into_iter().filter(|d| *d != table).collect();
        match self.dependencies.iter_mut().find(|(t, _)| *t == table) {
            Some((_, deps)) => *deps = depends_on,
            None => self.dependencies.push((table, depends_on)),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.dependencies.iter().any(|(t, _)| t == table)
    }

    fn dependencies_of(&self, table: &str) -> &[String] {
        self.dependencies
            .iter()
            .find(|(t, _)| t == table)
            .map_or(&[][..], |(_, d)| d.as_slice())
    }

    /// Check for dependency cycles in the registered tables.
    pub fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut cycle_path = Vec::new();

        for (table, _) in &self.dependencies {
            if !visited.contains(table.as_str())
                && self.detect_cycle_dfs(table, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                return Err(Error::session(
                    SessionErrorKind::CycleDetected,
                    format!("dependency cycle detected: {}", cycle_path.join(" -> ")),
                ));
            }
        }
        Ok(())
    }

    fn detect_cycle_dfs<'a>(
        &'a self,
        table: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> bool {
        visited.insert(table);
        rec_stack.insert(table);
        path.push(table);

        for dep in self.dependencies_of(table) {
            // Only tables being flushed
            if !self.contains(dep) {
                continue;
            }
            if !visited.contains(dep.as_str()) {
                if self.detect_cycle_dfs(dep, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep.as_str()) {
                path.push(dep);
                return true;
            }
        }

        rec_stack.remove(table);
        path.pop();
        false
    }

    /// Table names, parents before the tables that reference them.
    pub fn order(&self) -> Result<Vec<String>> {
        self.check_cycles()?;
        let mut out: Vec<String> = Vec::new();
        for (table, _) in &self.dependencies {
            self.visit(table, &mut out);
        }
        Ok(out)
    }

    fn visit(&self, table: &str, out: &mut Vec<String>) {
        if out.iter().any(|t| t == table) {
            return;
        }
        for dep in self.dependencies_of(table) {
            if self.contains(dep) {
                self.visit(dep, out);
            }
        }
        out.push(table.to_string());
    }
}

/// A foreign key to copy onto `child` before its row is written.
struct FkSync {
    child: Instance,
    /// `None` clears the foreign key.
    parent: Option<Instance>,
    /// (referenced column on the parent, foreign-key column on the child)
    pairs: Vec<(ColumnRef, ColumnRef)>,
}

/// A row written by the running flush.
struct InsertedRow {
    table: TableRef,
    /// Primary-key values of the stored row.
    key: Row,
    instance: Instance,
    /// Properties whose values storage generated.
    generated: Vec<String>,
}

impl Session {
    /// Write pending and modified instances to storage.
    ///
    /// If a write fails, rows inserted so far are removed again and the
    /// pending instances stay pending.
    ///
    /// A flush started while one is running returns immediately.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn flush(&self) -> Result<()> {
        if self.0.flushing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.flush_inner();
        self.0.flushing.store(false, Ordering::Release);
        result
    }

    fn flush_inner(&self) -> Result<()> {
        self.cascade()?;
        let (pending, persistent) = {
            let inner = self.inner();
            (inner.new.clone(), inner.identity_map.instances())
        };
        let dirty: Vec<&Instance> = persistent
            .iter()
            .filter(|i| i.state().is_some_and(|s| s.has_changes()))
            .collect();
        if pending.is_empty() && dirty.is_empty() {
            tracing::trace!("nothing to flush");
            return Ok(());
        }

        let all: Vec<Instance> = pending.iter().chain(&persistent).cloned().collect();
        let syncs = self.plan_foreign_keys(&all)?;

        let mut orderer = FlushOrderer::new();
        let mut tables: HashMap<String, TableRef> = HashMap::new();
        for instance in &all {
            for table in instance.instance_state()?.mapper().tables() {
                if !orderer.contains(table.name()) {
                    orderer.register_table(&table);
                    tables.insert(table.name().to_string(), table);
                }
            }
        }
        let order = orderer.order()?;
        tracing::debug!(
            pending = pending.len(),
            dirty = dirty.len(),
            tables = ?order,
            "flush plan"
        );

        let mut written: Vec<InsertedRow> = Vec::new();
        let (inserted, updated, keys) =
            match self.write_rows(&order, &tables, &all, &pending, &syncs, &mut written) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.undo_inserts(written);
                    return Err(err);
                }
            };
        {
            let mut inner = self.inner();
            for (instance, key) in pending.iter().zip(keys) {
                if let Some(state) = instance.state() {
                    state.set_identity(Some(key.clone()));
                }
                inner.new.retain(|i| !i.ptr_eq(instance));
                inner.identity_map.insert(key, instance.clone());
            }
        }
        for instance in &all {
            if let Some(state) = instance.state() {
                state.commit_all();
            }
        }
        tracing::debug!(inserted, updated, "flush complete");
        Ok(())
    }

    /// Write every table in `order`, then compute the identity keys of the
    /// pending instances. Inserted rows are recorded in `written`.
    fn write_rows(
        &self,
        order: &[String],
        tables: &HashMap<String, TableRef>,
        all: &[Instance],
        pending: &[Instance],
        syncs: &[FkSync],
        written: &mut Vec<InsertedRow>,
    ) -> Result<(usize, usize, Vec<IdentityKey>)> {
        let mut updated = 0usize;
        for name in order {
            let Some(table) = tables.get(name) else {
                continue;
            };
            for instance in all {
                let state = instance.instance_state()?;
                if !state.mapper().tables().iter().any(|t| Arc::ptr_eq(t, table)) {
                    continue;
                }
                apply_foreign_keys(instance, table, syncs)?;
                if pending.iter().any(|p| p.ptr_eq(instance)) {
                    written.push(self.insert_row(instance, table)?);
                } else if self.update_row(instance, table)? {
                    updated += 1;
                }
            }
        }

        let mut keys = Vec::with_capacity(pending.len());
        for instance in pending {
            let state = instance.instance_state()?;
            let mut values = Vec::new();
            for prop in state.mapper().primary_key_properties()? {
                values.push(state.loaded(prop.key()).map_or(Value::Null, |v| v.to_scalar()));
            }
            let key = state.mapper().identity_key_from_primary_key(values);
            if key.has_null() {
                return Err(Error::invalid_request(format!(
                    "instance {:?} has a NULL identity key after flush",
                    instance
                )));
            }
            keys.push(key);
        }
        Ok((written.len(), updated, keys))
    }

    /// Remove rows inserted by a failed flush, newest first, and forget the
    /// keys storage generated for them. The instances stay pending.
    fn undo_inserts(&self, written: Vec<InsertedRow>) {
        for row in written.into_iter().rev() {
            match self.0.storage.delete(&row.table, &row.key) {
                Ok(removed) => {
                    tracing::debug!(table = %row.table.name(), removed, "removed row of failed flush");
                }
                Err(err) => {
                    tracing::warn!(table = %row.table.name(), error = %err, "could not remove row of failed flush");
                }
            }
            if !row.generated.is_empty() {
                if let Some(state) = row.instance.state() {
                    state.expire(Some(row.generated.as_slice()));
                }
            }
        }
    }

    /// Save-update cascade: attach transient or detached instances reachable
    /// through loaded relationship slots.
    fn cascade(&self) -> Result<()> {
        let mut queue: Vec<Instance> = {
            let inner = self.inner();
            inner
                .new
                .iter()
                .cloned()
                .chain(inner.identity_map.instances())
                .collect()
        };
        let mut seen: Vec<Instance> = Vec::new();
        while let Some(instance) = queue.pop() {
            if seen.iter().any(|s| s.ptr_eq(&instance)) {
                continue;
            }
            let state = instance.instance_state()?;
            for (key, _) in state.mapper().relationships().iter() {
                let Some(value) = state.loaded(key) else {
                    continue;
                };
                for related in value.to_collection() {
                    if !self.contains(&related) {
                        tracing::trace!(from = ?instance, related = ?related, key, "cascading save-update");
                        self.add(&related)?;
                    }
                    queue.push(related);
                }
            }
            seen.push(instance);
        }
        Ok(())
    }

    /// Foreign keys implied by relationship slots of pending or modified
    /// instances.
    fn plan_foreign_keys(&self, all: &[Instance]) -> Result<Vec<FkSync>> {
        let mut syncs = Vec::new();
        for instance in all {
            let state = instance.instance_state()?;
            let is_pending = state.identity_key().is_none();
            let slots = state.slots();
            for (key, rel) in state.mapper().relationships().iter() {
                let Some(slot) = slots.get(key) else {
                    continue;
                };
                let Some(value) = &slot.value else {
                    continue;
                };
                if !is_pending && !slot.original.is_modified() {
                    continue;
                }
                let join = rel.join()?;
                let history = match value {
                    AttrValue::Collection(c) => History::from_collection(Some(c), &slot.original),
                    AttrValue::Object(o) => History::from_object(Some(o), &slot.original),
                    AttrValue::Scalar(_) => continue,
                };
                if join.direction == RelationshipKind::OneToMany {
                    for child in history.non_deleted().iter().filter_map(|h| h.as_instance()) {
                        syncs.push(FkSync {
                            child: child.clone(),
                            parent: Some(instance.clone()),
                            pairs: join.pairs.clone(),
                        });
                    }
                    for child in history.deleted.iter().filter_map(|h| h.as_instance()) {
                        syncs.push(FkSync {
                            child: child.clone(),
                            parent: None,
                            pairs: join.pairs.clone(),
                        });
                    }
                } else {
                    syncs.push(FkSync {
                        child: instance.clone(),
                        parent: value.to_collection().into_iter().next(),
                        pairs: join.pairs.clone(),
                    });
                }
            }
        }
        Ok(syncs)
    }

    fn insert_row(&self, instance: &Instance, table: &TableRef) -> Result<InsertedRow> {
        let state = instance.instance_state()?;
        let mapper = state.mapper();
        let mut row = Row::new();
        for (key, prop) in mapper.column_attrs().iter() {
            let Some(column) = prop.column_for_table(table) else {
                continue;
            };
            if let Some(AttrValue::Scalar(v)) = state.loaded(key) {
                row.set(column.name(), v);
            }
        }
        for m in mapper.iterate_to_self() {
            if !Arc::ptr_eq(m.local_table(), table) {
                continue;
            }
            for (parent_col, local_fk) in m.inherit_condition() {
                if row.get_by_name(local_fk.name()).is_none_or(Value::is_null) {
                    row.set(local_fk.name(), column_value(state, parent_col)?);
                }
            }
        }

        let stored = self.0.storage.insert(table, row.clone())?;
        let mut generated = Vec::new();
        for (name, value) in stored.iter() {
            if row.contains_column(name) || value.is_null() {
                continue;
            }
            let Some(column) = table.c(name).filter(|c| c.is_primary_key()) else {
                continue;
            };
            if let Some(prop) = mapper.property_for_column(&column) {
                state.write_committed(prop.key(), AttrValue::Scalar(value.clone()));
                generated.push(prop.key().to_string());
            }
        }
        tracing::trace!(table = %table.name(), instance = ?instance, "inserted row");
        let key = table
            .primary_key()
            .iter()
            .map(|c| {
                let v = stored.get_by_name(c.name()).cloned().unwrap_or(Value::Null);
                (c.name().to_string(), v)
            })
            .collect();
        Ok(InsertedRow {
            table: Arc::clone(table),
            key,
            instance: instance.clone(),
            generated,
        })
    }

    /// UPDATE the modified columns of `table`. Returns whether a row was written.
    fn update_row(&self, instance: &Instance, table: &TableRef) -> Result<bool> {
        let state = instance.instance_state()?;
        let mapper = state.mapper();
        let slots = state.slots();
        let mut values = Row::new();
        for (key, prop) in mapper.column_attrs().iter() {
            let (Some(column), Some(slot)) = (prop.column_for_table(table), slots.get(key)) else {
                continue;
            };
            let current = slot.value.as_ref().and_then(AttrValue::as_scalar);
            if let (true, Some(v)) = (
                History::from_scalar(current, &slot.original).has_changes(),
                current,
            ) {
                values.set(column.name(), v.clone());
            }
        }
        if values.is_empty() {
            return Ok(false);
        }

        let mut key = Row::new();
        for column in table.primary_key() {
            let Some(prop) = mapper.property_for_column(&column) else {
                continue;
            };
            let value = match slots.get(prop.key()).map(|s| &s.original) {
                Some(Original::Value(AttrValue::Scalar(o))) => o.clone(),
                _ => column_value(state, &column)?,
            };
            key.set(column.name(), value);
        }
        let matched = self.0.storage.update(table, &key, values)?;
        if matched == 0 {
            return Err(Error::session(
                SessionErrorKind::ObjectDeleted,
                format!(
                    "UPDATE statement on table '{}' expected to update 1 row(s); 0 were matched",
                    table.name()
                ),
            ));
        }
        tracing::trace!(table = %table.name(), instance = ?instance, "updated row");
        Ok(true)
    }
}

/// Copy foreign-key values onto `instance` for columns living in `table`.
fn apply_foreign_keys(instance: &Instance, table: &TableRef, syncs: &[FkSync]) -> Result<()> {
    let state = instance.instance_state()?;
    for sync in syncs.iter().filter(|s| s.child.ptr_eq(instance)) {
        for (referenced, fk) in &sync.pairs {
            if fk.table_name() != table.name() {
                continue;
            }
            let Some(prop) = state.mapper().property_for_column(fk) else {
                continue;
            };
            let value = match &sync.parent {
                Some(parent) => column_value(parent.instance_state()?, referenced)?,
                None => Value::Null,
            };
            let current = state.loaded(prop.key()).map(|v| v.to_scalar());
            if current.as_ref() != Some(&value) {
                state.set(prop.key(), AttrValue::Scalar(value))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_parents_first() {
        let mut orderer = FlushOrderer::new();
        orderer.register("addresses", vec!["users".into()]);
        orderer.register("dingalings", vec!["addresses".into()]);
        orderer.register("users", vec![]);
        let order = orderer.order().unwrap();
        assert_eq!(order, vec!["users", "addresses", "dingalings"]);
    }

    #[test]
    fn ignores_unregistered_and_self_references() {
        let mut orderer = FlushOrderer::new();
        orderer.register("nodes", vec!["nodes".into(), "elsewhere".into()]);
        assert_eq!(orderer.order().unwrap(), vec!["nodes"]);
    }

    #[test]
    fn reports_cycles() {
        let mut orderer = FlushOrderer::new();
        orderer.register("a", vec!["b".into()]);
        orderer.register("b", vec!["a".into()]);
        let err = orderer.order().unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::CycleDetected));
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
