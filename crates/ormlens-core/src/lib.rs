//! Core types for ormlens.
//!
//! This crate provides the foundations the mapping, session and inspection
//! layers are built on:
//!
//! - `Value` for dynamically-typed column values
//! - `Table`, `Column` and `Selectable` schema objects
//! - `Model` trait and static `FieldInfo` / `RelationshipInfo` metadata
//! - the workspace-wide `Error` type

pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod relationship;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use error::{Error, MappingError, MappingErrorKind, Result, SessionError, SessionErrorKind};
pub use field::FieldInfo;
pub use identifiers::{is_valid_attribute_key, validate_attribute_key};
pub use model::Model;
pub use relationship::{RelationshipInfo, RelationshipKind};
pub use row::Row;
pub use schema::{Alias, Column, ColumnRef, Join, MetaData, Selectable, Table, TableRef};
pub use types::SqlType;
pub use value::Value;
