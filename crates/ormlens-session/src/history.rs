//! Attribute change history.
//!
//! A history is computed from two inputs: the value currently present in the
//! instance slot (if any) and the original recorded at the first change after
//! the last sync point.

use std::fmt;

use ormlens_core::Value;

use crate::instance::{AttrValue, Instance};

/// Value of a slot before its first change since the last sync point.
#[derive(Debug, Clone, Default)]
pub(crate) enum Original {
    /// No change since the last sync point.
    #[default]
    Unmodified,
    /// Changed while no value was present.
    NoValue,
    Value(AttrValue),
}

impl Original {
    pub(crate) fn is_modified(&self) -> bool {
        !matches!(self, Original::Unmodified)
    }
}

/// One entry of a [`History`].
#[derive(Clone)]
pub enum HistoryItem {
    Scalar(Value),
    /// A related instance, or `None` for an empty many-to-one reference.
    Object(Option<Instance>),
}

impl HistoryItem {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            HistoryItem::Scalar(v) => Some(v),
            HistoryItem::Object(_) => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            HistoryItem::Object(o) => o.as_ref(),
            HistoryItem::Scalar(_) => None,
        }
    }
}

impl PartialEq for HistoryItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HistoryItem::Scalar(a), HistoryItem::Scalar(b)) => a == b,
            (HistoryItem::Object(a), HistoryItem::Object(b)) => match (a, b) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Debug for HistoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryItem::Scalar(v) => write!(f, "{}", v),
            HistoryItem::Object(Some(i)) => write!(f, "{:?}", i),
            HistoryItem::Object(None) => write!(f, "None"),
        }
    }
}

impl From<Value> for HistoryItem {
    fn from(v: Value) -> Self {
        HistoryItem::Scalar(v)
    }
}

impl From<&str> for HistoryItem {
    fn from(v: &str) -> Self {
        HistoryItem::Scalar(v.into())
    }
}

impl From<i64> for HistoryItem {
    fn from(v: i64) -> Self {
        HistoryItem::Scalar(v.into())
    }
}

impl From<Instance> for HistoryItem {
    fn from(i: Instance) -> Self {
        HistoryItem::Object(Some(i))
    }
}

impl From<&Instance> for HistoryItem {
    fn from(i: &Instance) -> Self {
        HistoryItem::Object(Some(i.clone()))
    }
}

/// Added, unchanged and deleted values of one attribute.
#[derive(Clone, Default, PartialEq)]
pub struct History {
    pub added: Vec<HistoryItem>,
    pub unchanged: Vec<HistoryItem>,
    pub deleted: Vec<HistoryItem>,
}

impl History {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.unchanged.is_empty() && self.deleted.is_empty()
    }

    /// Whether anything was added or deleted.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty()
    }

    /// Added followed by unchanged.
    pub fn non_deleted(&self) -> Vec<HistoryItem> {
        self.added.iter().chain(&self.unchanged).cloned().collect()
    }

    /// Unchanged followed by deleted.
    pub fn non_added(&self) -> Vec<HistoryItem> {
        self.unchanged.iter().chain(&self.deleted).cloned().collect()
    }

    /// Added, unchanged and deleted in one list.
    pub fn sum(&self) -> Vec<HistoryItem> {
        self.added
            .iter()
            .chain(&self.unchanged)
            .chain(&self.deleted)
            .cloned()
            .collect()
    }

    fn unchanged_only(item: HistoryItem) -> Self {
        History {
            unchanged: vec![item],
            ..Self::default()
        }
    }

    /// History of a column attribute.
    pub(crate) fn from_scalar(current: Option<&Value>, original: &Original) -> Self {
        match (original, current) {
            (Original::Unmodified, None) => Self::empty(),
            (Original::Unmodified, Some(c)) => Self::unchanged_only(HistoryItem::Scalar(c.clone())),
            (Original::Value(AttrValue::Scalar(o)), Some(c)) if o == c => {
                Self::unchanged_only(HistoryItem::Scalar(c.clone()))
            }
            (Original::Value(o), current) => History {
                added: current.map(|c| HistoryItem::Scalar(c.clone())).into_iter().collect(),
                unchanged: Vec::new(),
                deleted: vec![HistoryItem::Scalar(o.to_scalar())],
            },
            (Original::NoValue, current) => History {
                added: vec![HistoryItem::Scalar(current.cloned().unwrap_or(Value::Null))],
                ..Self::default()
            },
        }
    }

    /// History of a many-to-one reference, compared by identity.
    pub(crate) fn from_object(current: Option<&Option<Instance>>, original: &Original) -> Self {
        let same = |a: &Option<Instance>, b: &Option<Instance>| match (a, b) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        match (original, current) {
            (Original::Unmodified, None) => Self::empty(),
            (Original::Unmodified, Some(c)) => Self::unchanged_only(HistoryItem::Object(c.clone())),
            (Original::Value(AttrValue::Object(o)), Some(c)) if same(o, c) => {
                Self::unchanged_only(HistoryItem::Object(c.clone()))
            }
            (original, current) => {
                let deleted = match original {
                    Original::Value(AttrValue::Object(Some(o))) => {
                        vec![HistoryItem::Object(Some(o.clone()))]
                    }
                    _ => Vec::new(),
                };
                History {
                    added: current
                        .map(|c| HistoryItem::Object(c.clone()))
                        .into_iter()
                        .collect(),
                    unchanged: Vec::new(),
                    deleted,
                }
            }
        }
    }

    /// History of a collection, members compared by identity.
    pub(crate) fn from_collection(current: Option<&[Instance]>, original: &Original) -> Self {
        let Some(current) = current else {
            return Self::empty();
        };
        let members = |items: &[Instance]| -> Vec<HistoryItem> {
            items.iter().map(HistoryItem::from).collect()
        };
        match original {
            Original::Unmodified => History {
                unchanged: members(current),
                ..Self::default()
            },
            Original::NoValue => History {
                added: members(current),
                ..Self::default()
            },
            Original::Value(o) => {
                let original = o.to_collection();
                let contains = |set: &[Instance], i: &Instance| set.iter().any(|x| x.ptr_eq(i));
                History {
                    added: current
                        .iter()
                        .filter(|i| !contains(&original, i))
                        .map(HistoryItem::from)
                        .collect(),
                    unchanged: current
                        .iter()
                        .filter(|i| contains(&original, i))
                        .map(HistoryItem::from)
                        .collect(),
                    deleted: original
                        .iter()
                        .filter(|i| !contains(current, i))
                        .map(HistoryItem::from)
                        .collect(),
                }
            }
        }
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "History(added={:?}, unchanged={:?}, deleted={:?})",
            self.added, self.unchanged, self.deleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn scalar_unmodified() {
        assert!(History::from_scalar(None, &Original::Unmodified).is_empty());
        let h = History::from_scalar(Some(&text("ed")), &Original::Unmodified);
        assert_eq!(h.unchanged, vec![HistoryItem::from("ed")]);
        assert!(!h.has_changes());
    }

    #[test]
    fn scalar_changed_from_known_value() {
        let original = Original::Value(AttrValue::Scalar(text("ed")));
        let h = History::from_scalar(Some(&text("jack")), &original);
        assert_eq!(h.added, vec![HistoryItem::from("jack")]);
        assert_eq!(h.deleted, vec![HistoryItem::from("ed")]);
        assert!(h.unchanged.is_empty());
    }

    #[test]
    fn scalar_set_back_to_original_is_unchanged() {
        let original = Original::Value(AttrValue::Scalar(text("ed")));
        let h = History::from_scalar(Some(&text("ed")), &original);
        assert_eq!(h.unchanged, vec![HistoryItem::from("ed")]);
        assert!(!h.has_changes());
    }

    #[test]
    fn scalar_null_original_is_deleted() {
        let original = Original::Value(AttrValue::Scalar(Value::Null));
        let h = History::from_scalar(Some(&text("ed")), &original);
        assert_eq!(h.deleted, vec![HistoryItem::Scalar(Value::Null)]);
    }

    #[test]
    fn scalar_without_original() {
        let h = History::from_scalar(Some(&text("ed")), &Original::NoValue);
        assert_eq!(h.added, vec![HistoryItem::from("ed")]);
        assert!(h.deleted.is_empty());
        let removed = History::from_scalar(None, &Original::NoValue);
        assert_eq!(removed.added, vec![HistoryItem::Scalar(Value::Null)]);
    }

    #[test]
    fn object_none_original_not_deleted() {
        let original = Original::Value(AttrValue::Object(None));
        let h = History::from_object(Some(&None), &original);
        assert_eq!(h.unchanged, vec![HistoryItem::Object(None)]);
        let h = History::from_object(None, &original);
        assert!(h.is_empty());
    }

    #[test]
    fn sums() {
        let h = History {
            added: vec!["a".into()],
            unchanged: vec!["b".into()],
            deleted: vec!["c".into()],
        };
        assert_eq!(h.sum().len(), 3);
        assert_eq!(h.non_deleted(), vec![HistoryItem::from("a"), "b".into()]);
        assert_eq!(h.non_added(), vec![HistoryItem::from("b"), "c".into()]);
    }
}
