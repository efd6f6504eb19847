use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A compile-time constant value: the payload of constant, global and
/// free-variable references, and of constant-folded exception arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Int(BigInt),
    Float(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Const>),
    None,
}

impl Const {
    pub fn int(value: i64) -> Self {
        Const::Int(BigInt::from(value))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Const::Int(value) => value.to_i64(),
            _ => None,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(value) => write!(f, "{}", value),
            Const::Float(value) => write!(f, "{}", value),
            Const::Bool(value) => write!(f, "{}", value),
            Const::Str(value) => write!(f, "{:?}", value),
            Const::Tuple(items) => {
                let inner = items
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({})", inner)
            }
            Const::None => write!(f, "none"),
        }
    }
}
