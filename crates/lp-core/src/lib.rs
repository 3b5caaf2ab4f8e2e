//! # lp-core — The "Atoms" of LOGPIPE
//!
//! Defines what flows through a query pipeline: a [`Record`] is a single
//! field-map, a [`Schema`] is the ordered list of typed fields one stage
//! promises to the next.
//!
//! Also home to [`window`], the clipping arithmetic every paged read in the
//! workspace goes through. It is verified with Kani below.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A JSON value carried inside a [`Record`].
pub type Value = serde_json::Value;

/// One log record: field name → value. Field order carries no meaning.
pub type Record = serde_json::Map<String, Value>;

/// Name of the field that carries a record's event time.
pub const TIME_FIELD: &str = "_time";

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Double,
    Bool,
    Timestamp,
    /// Mixed or unknown.
    Any,
}

impl FieldKind {
    /// Infer the kind of a single value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Double,
            Value::Bool(_) => Self::Bool,
            _ => Self::Any,
        }
    }

    /// The kind that covers both `self` and `other`.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Double) | (Self::Double, Self::Integer) => Self::Double,
            _ => Self::Any,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Double => write!(f, "double"),
            Self::Bool => write!(f, "bool"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered list of fields describing the records one stage emits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Build a schema from the union of keys in `records`, in first-seen order.
    ///
    /// A field whose values disagree on type becomes [`FieldKind::Any`]
    /// (integers mixed with doubles widen to [`FieldKind::Double`]).
    /// [`TIME_FIELD`] is always declared as [`FieldKind::Timestamp`].
    pub fn infer<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut fields: Vec<Field> = Vec::new();
        for record in records {
            for (name, value) in record {
                let kind = if name == TIME_FIELD {
                    FieldKind::Timestamp
                } else {
                    FieldKind::of(value)
                };
                match fields.iter_mut().find(|f| &f.name == name) {
                    Some(field) => field.kind = field.kind.merge(kind),
                    None => fields.push(Field::new(name.clone(), kind)),
                }
            }
        }
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Keep only `names`, in the order given. Names this schema does not
    /// declare are kept as [`FieldKind::Any`].
    pub fn project(&self, names: &[String]) -> Self {
        let fields = names
            .iter()
            .map(|name| {
                self.field(name)
                    .cloned()
                    .unwrap_or_else(|| Field::new(name.clone(), FieldKind::Any))
            })
            .collect();
        Self { fields }
    }

    /// Drop every field named in `names`.
    pub fn without(&self, names: &[String]) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|f| !names.contains(&f.name))
            .cloned()
            .collect();
        Self { fields }
    }

    /// Rename `from` to `to`, keeping its position and kind.
    pub fn rename(&self, from: &str, to: &str) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                if f.name == from {
                    Field::new(to, f.kind)
                } else {
                    f.clone()
                }
            })
            .collect();
        Self { fields }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", field.name, field.kind)?;
        }
        Ok(())
    }
}

/// Clip the window `[offset, offset + limit)` to a sequence of `len` items.
///
/// Returns an empty range at `len` when `offset >= len`. Never overflows,
/// even for `limit == usize::MAX`.
#[inline]
pub fn window(len: usize, offset: usize, limit: usize) -> Range<usize> {
    if offset >= len {
        return len..len;
    }
    offset..offset + limit.min(len - offset)
}

// =============================================================================
// Kani Proofs: Window Clipping
// =============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// **Proof: a clipped window never leaves the sequence**
    #[kani::proof]
    fn verify_window_in_bounds() {
        let len: usize = kani::any();
        let offset: usize = kani::any();
        let limit: usize = kani::any();

        let range = window(len, offset, limit);

        assert!(range.start <= range.end);
        assert!(range.end <= len);
        assert!(range.end - range.start <= limit);
    }

    /// **Proof: a window starting inside the sequence starts at `offset`**
    #[kani::proof]
    fn verify_window_starts_at_offset() {
        let len: usize = kani::any();
        let offset: usize = kani::any();
        let limit: usize = kani::any();
        kani::assume(offset < len);

        let range = window(len, offset, limit);

        assert!(range.start == offset);
        assert!(range.end - range.start == core::cmp::min(limit, len - offset));
    }
}
