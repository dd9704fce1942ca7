//! Attribute loading: column fetches, lazy relationship loads and instance
//! construction from stored rows.

use std::sync::Arc;

use ormlens_core::{ColumnRef, Error, RelationshipKind, Result, Row, SessionErrorKind, TableRef, Value};
use ormlens_mapper::{IdentityKey, Mapper, MapperProperty, RelationshipProperty};

use crate::Session;
use crate::instance::{AttrValue, Instance};
use crate::state::InstanceState;

impl Session {
    /// Load the slot behind `property` for a persistent instance.
    pub(crate) fn load_attribute(&self, state: &InstanceState, property: &MapperProperty) -> Result<()> {
        self.autoflush()?;
        match property {
            MapperProperty::Column(_) => self.load_columns(state),
            MapperProperty::Relationship(r) => self.lazy_load(state, r),
            MapperProperty::Synonym(_) => Ok(()),
        }
    }

    /// Fetch the rows of every table of the instance's mapper and fill all
    /// absent column slots.
    pub(crate) fn load_columns(&self, state: &InstanceState) -> Result<()> {
        let Some(identity) = state.identity_key() else {
            return Ok(());
        };
        let mapper = state.mapper();
        let rows = self.fetch_rows(mapper, &identity)?.ok_or_else(|| {
            Error::session(
                SessionErrorKind::ObjectDeleted,
                format!(
                    "instance {:?} has been deleted, or its row is otherwise not present",
                    identity
                ),
            )
        })?;
        tracing::trace!(identity = ?identity, tables = rows.len(), "loading column attributes");
        fill_columns(state, mapper, &rows);
        Ok(())
    }

    /// Rows of the base table and of each joined-inheritance table, keyed by
    /// the identity. `None` when the base row is missing.
    fn fetch_rows(&self, mapper: &Mapper, identity: &IdentityKey) -> Result<Option<Vec<(TableRef, Row)>>> {
        let mut rows: Vec<(TableRef, Row)> = Vec::new();
        for m in mapper.iterate_to_self() {
            let table = Arc::clone(m.local_table());
            if m.inherits().is_none() {
                let key: Row = m
                    .primary_key()
                    .iter()
                    .zip(identity.values())
                    .map(|(c, v)| (c.name().to_string(), v.clone()))
                    .collect();
                match self.0.storage.fetch(&table, &key)? {
                    Some(row) => rows.push((table, row)),
                    None => return Ok(None),
                }
            } else if !m.is_single_table() {
                let mut criteria = Row::new();
                for (parent_col, local_fk) in m.inherit_condition() {
                    criteria.set(local_fk.name(), row_value(&rows, parent_col));
                }
                if let Some(row) = self.0.storage.fetch(&table, &criteria)? {
                    rows.push((table, row));
                }
            }
        }
        Ok(Some(rows))
    }

    /// Load an instance by identity from storage and register it.
    pub(crate) fn load_identity(&self, mapper: &Arc<Mapper>, key: IdentityKey) -> Result<Option<Instance>> {
        let Some(rows) = self.fetch_rows(mapper, &key)? else {
            tracing::trace!(identity = ?key, "no row for identity");
            return Ok(None);
        };
        let instance = Instance::new(mapper.class());
        let state = instance.instance_state()?;
        fill_columns(state, mapper, &rows);
        Ok(Some(self.register_loaded(instance, key)))
    }

    /// Put a freshly loaded instance in the identity map, or return the
    /// instance already there.
    fn register_loaded(&self, instance: Instance, key: IdentityKey) -> Instance {
        let mut inner = self.inner();
        if let Some(existing) = inner.identity_map.get(&key) {
            return existing.clone();
        }
        if let Some(state) = instance.state() {
            state.set_identity(Some(key.clone()));
            state.attach(Arc::downgrade(&self.0));
        }
        inner.identity_map.insert(key, instance.clone());
        instance
    }

    #[tracing::instrument(level = "debug", skip(self, state, rel), fields(key = %rel.key()))]
    fn lazy_load(&self, state: &InstanceState, rel: &RelationshipProperty) -> Result<()> {
        let join = rel.join()?;
        let target = rel.mapper()?;
        let uselist = rel.uselist()?;
        let empty = || {
            if uselist {
                AttrValue::Collection(Vec::new())
            } else {
                AttrValue::Object(None)
            }
        };

        // The side whose values are known, and the columns to match them on.
        let (source_cols, target_cols): (Vec<&ColumnRef>, Vec<&ColumnRef>) =
            if join.direction == RelationshipKind::OneToMany {
                join.pairs.iter().map(|(r, fk)| (r, fk)).unzip()
            } else {
                join.pairs.iter().map(|(r, fk)| (fk, r)).unzip()
            };

        let mut criteria = Row::new();
        for (source, target_col) in source_cols.iter().zip(&target_cols) {
            let value = column_value(state, source)?;
            if value.is_null() {
                state.populate(rel.key(), empty());
                return Ok(());
            }
            criteria.set(target_col.name(), value);
        }
        let Some(table) = target_cols
            .first()
            .and_then(|c| target.tables().into_iter().find(|t| t.name() == c.table_name()))
        else {
            state.populate(rel.key(), empty());
            return Ok(());
        };

        let rows = self.0.storage.select_by(&table, &criteria)?;
        let mut related = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(instance) = self.instance_from_row(&target, &table, &row)? {
                related.push(instance);
            }
        }
        tracing::trace!(found = related.len(), "lazy load complete");
        let value = if uselist {
            AttrValue::Collection(related)
        } else {
            AttrValue::Object(related.into_iter().next())
        };
        state.populate(rel.key(), value);
        Ok(())
    }

    /// The persistent instance for a row of `table`, creating it if needed.
    fn instance_from_row(&self, mapper: &Arc<Mapper>, table: &TableRef, row: &Row) -> Result<Option<Instance>> {
        let mut pk = Vec::new();
        for column in mapper.primary_key() {
            match row.get_by_name(column.name()) {
                Some(v) if !v.is_null() => pk.push(v.clone()),
                _ => {
                    tracing::warn!(
                        table = %table.name(),
                        column = %column.name(),
                        "row lacks a primary key value; skipping"
                    );
                    return Ok(None);
                }
            }
        }
        let key = mapper.identity_key_from_primary_key(pk);
        if let Some(existing) = self.inner().identity_map.get(&key).cloned() {
            return Ok(Some(existing));
        }
        let instance = Instance::new(mapper.class());
        let state = instance.instance_state()?;
        for (key, prop) in mapper.column_attrs().iter() {
            if let Some(value) = prop
                .column_for_table(table)
                .and_then(|c| row.get_by_name(c.name()))
            {
                state.populate(key, AttrValue::Scalar(value.clone()));
            }
        }
        Ok(Some(self.register_loaded(instance, key)))
    }
}

/// Value of `column` on the instance, through the property mapping it.
pub(crate) fn column_value(state: &InstanceState, column: &ColumnRef) -> Result<Value> {
    match state.mapper().property_for_column(column) {
        Some(prop) => Ok(state.get(prop.key())?.to_scalar()),
        None => Ok(Value::Null),
    }
}

fn row_value(rows: &[(TableRef, Row)], column: &ColumnRef) -> Value {
    rows.iter()
        .find(|(t, _)| t.name() == column.table_name())
        .and_then(|(_, r)| r.get_by_name(column.name()))
        .cloned()
        .unwrap_or(Value::Null)
}

fn fill_columns(state: &InstanceState, mapper: &Mapper, rows: &[(TableRef, Row)]) {
    for (key, prop) in mapper.column_attrs().iter() {
        let value = prop
            .columns()
            .iter()
            .find_map(|c| {
                rows.iter()
                    .find(|(t, _)| t.name() == c.table_name())
                    .and_then(|(_, r)| r.get_by_name(c.name()))
            })
            .cloned()
            .unwrap_or(Value::Null);
        state.populate(key, AttrValue::Scalar(value));
    }
}
