//! Identity keys: (base mapped class, primary-key tuple).

use std::fmt;
use std::hash::{Hash, Hasher};

use ormlens_core::Value;

use crate::class::Class;

/// Identifies one persistent row across a mapped hierarchy.
#[derive(Clone)]
pub struct IdentityKey {
    class: Class,
    values: Vec<Value>,
    /// Hash of the primary key value(s).
    pk_hash: u64,
}

impl IdentityKey {
    /// Create a key for `class` (the base class of the hierarchy).
    ///
    /// Integer components are widened so `Int(1)` and `BigInt(1)` name the
    /// same row.
    pub fn new(class: Class, values: Vec<Value>) -> Self {
        let values: Vec<Value> = values
            .into_iter()
            .map(|v| match v {
                Value::Int(i) => Value::BigInt(i64::from(i)),
                other => other,
            })
            .collect();
        let pk_hash = hash_values(&values);
        Self {
            class,
            values,
            pk_hash,
        }
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    /// Primary key values in primary-key column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }

    /// Whether any component is NULL; such a key identifies nothing.
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }
}

/// Hash a slice of values for use as a primary key hash.
fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    for v in values {
        v.hash_into(&mut hasher);
    }
    hasher.finish()
}

/// Component equality consistent with `hash_values`: doubles compare by bit
/// pattern, so a NaN key equals itself.
fn component_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.pk_hash == other.pk_hash
            && self.class.ptr_eq(&other.class)
            && self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| component_eq(a, b))
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pk_hash.hash(state);
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "({}, ({}))", self.class.name(), values.join(", "))
    }
}
