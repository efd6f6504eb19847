use crate::types::{Signature, Type};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Variable name → resolved type, produced by type inference.
///
/// Fallback compilation uses [`TypeMap::with_default`], which answers the
/// opaque object type for every name, seen or not. The default is an explicit
/// constructor rather than an implicit miss behavior so the call site shows
/// which mode is in effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeMap {
    map: HashMap<String, Type>,
    default: Option<Type>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(default: Type) -> Self {
        Self {
            map: HashMap::new(),
            default: Some(default),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: Type) {
        self.map.insert(name.into(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.map.get(name).or(self.default.as_ref())
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Identifier of one type-bearing operation node, assigned by the IR
/// producer and used to key the signature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(pub u32);

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Operation node → resolved signature, produced by type inference. Lowering
/// never re-derives a signature; a missing entry is an internal-consistency
/// failure in the producer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureTable {
    map: HashMap<OpId, Signature>,
}

impl SignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: OpId, sig: Signature) {
        self.map.insert(id, sig);
    }

    pub fn get(&self, id: OpId) -> Option<&Signature> {
        self.map.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
