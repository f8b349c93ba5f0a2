//! Settlement payload model.
//!
//! Deferred values settle with a `Value`: a small self-describing datum that
//! the settlement machinery itself never inspects.  Key properties:
//!
//! - **Opaque to the state machine**: only continuations, combinators, and
//!   callers look inside
//! - **`Undefined` is the gap datum**: missing combinator slots and unit-like
//!   continuation results
//! - **`List` carries ordered collections**: combinator results settle as one
//!   value
//! - **Serializable**: settled payloads round-trip through serde for
//!   snapshotting and witness comparison

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Value — settlement payload
// ---------------------------------------------------------------------------

/// Payload carried by a settlement, fulfillment and rejection alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- type_name --

    #[test]
    fn type_names_cover_every_variant() {
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Bool(true).type_name(), "boolean");
        assert_eq!(Value::Int(42).type_name(), "number");
        assert_eq!(Value::Str("hi".to_string()).type_name(), "string");
        assert_eq!(Value::List(vec![]).type_name(), "list");
    }

    #[test]
    fn is_undefined_only_on_undefined() {
        assert!(Value::Undefined.is_undefined());
        assert!(!Value::Null.is_undefined());
        assert!(!Value::Int(0).is_undefined());
    }

    // -- Display --

    #[test]
    fn display_renders_scalars_bare() {
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Str("caught:fail".to_string()).to_string(), "caught:fail");
    }

    #[test]
    fn display_renders_lists_bracketed() {
        let list = Value::List(vec![
            Value::Int(1),
            Value::Str("two".to_string()),
            Value::List(vec![Value::Int(3)]),
        ]);
        assert_eq!(list.to_string(), "[1, two, [3]]");
    }

    // -- serde --

    #[test]
    fn serde_round_trip_preserves_every_variant() {
        let values = vec![
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::Int(i64::MIN),
            Value::Str("payload".to_string()),
            Value::List(vec![Value::Int(1), Value::Undefined]),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }
}
