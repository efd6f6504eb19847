use crate::loc::Loc;
use crate::typing::OpId;
use crate::values::Const;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque handle to a value already materialized in the backend. Carried by
/// intrinsic call nodes, whose arguments are pre-built rather than loaded
/// from variable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRef(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
    pub loc: Loc,
}

impl Var {
    pub fn new(name: impl Into<String>, loc: Loc) -> Self {
        Self {
            name: name.into(),
            loc,
        }
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RhsValue {
    Const { value: Const },
    /// Module-level global, frozen at compile time. `value` is present only
    /// when the global has a representable constant payload.
    Global { name: String, value: Option<Const> },
    /// Closure variable; frozen like a global in native compilation.
    FreeVar { name: String, value: Option<Const> },
    Var(Var),
    Expr(Expr),
}

impl RhsValue {
    /// Constant-folds this definition, if it is a reference with a
    /// representable constant payload.
    pub fn as_constant(&self) -> Option<&Const> {
        match self {
            RhsValue::Const { value } => Some(value),
            RhsValue::Global { value, .. } | RhsValue::FreeVar { value, .. } => value.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    Var(Var),
    /// Target operation invoked with pre-built backend values; no variable
    /// loads or coercions are applied.
    Intrinsic { name: String, args: Vec<ValueRef> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    BinOp {
        op: String,
        lhs: Var,
        rhs: Var,
        op_id: OpId,
    },
    InplaceBinOp {
        op: String,
        lhs: Var,
        rhs: Var,
        op_id: OpId,
    },
    UnaryOp {
        op: String,
        value: Var,
        op_id: OpId,
    },
    Call {
        callee: Callee,
        args: Vec<Var>,
        kws: Vec<(String, Var)>,
        op_id: OpId,
    },
    PairFirst {
        value: Var,
    },
    PairSecond {
        value: Var,
    },
    GetIter {
        value: Var,
        op_id: OpId,
    },
    IterNext {
        value: Var,
        op_id: OpId,
    },
    /// Unpack an iterable into exactly `count` elements, enforcing full
    /// consumption at run time.
    ExhaustIter {
        value: Var,
        count: usize,
    },
    GetAttr {
        value: Var,
        attr: String,
    },
    /// Indexed load with a compile-time-constant index.
    StaticGetItem {
        value: Var,
        index: i64,
    },
    GetItem {
        value: Var,
        index: Var,
        op_id: OpId,
    },
    BuildTuple {
        items: Vec<Var>,
    },
    Cast {
        value: Var,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Assign {
        target: Var,
        value: RhsValue,
        loc: Loc,
    },
    Branch {
        cond: Var,
        true_dest: usize,
        false_dest: usize,
        loc: Loc,
    },
    Jump {
        target: usize,
        loc: Loc,
    },
    Return {
        value: Var,
        loc: Loc,
    },
    SetItem {
        target: Var,
        index: Var,
        value: Var,
        op_id: OpId,
        loc: Loc,
    },
    SetAttr {
        target: Var,
        attr: String,
        value: Var,
        op_id: OpId,
        loc: Loc,
    },
    Raise {
        exception: Option<Var>,
        loc: Loc,
    },
    /// Lifetime bookkeeping is owned by the backend's value handling; this
    /// is a no-op during lowering.
    Del {
        name: String,
        loc: Loc,
    },
}

impl Instruction {
    pub fn loc(&self) -> Loc {
        match self {
            Instruction::Assign { loc, .. }
            | Instruction::Branch { loc, .. }
            | Instruction::Jump { loc, .. }
            | Instruction::Return { loc, .. }
            | Instruction::SetItem { loc, .. }
            | Instruction::SetAttr { loc, .. }
            | Instruction::Raise { loc, .. }
            | Instruction::Del { loc, .. } => *loc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub body: Vec<Instruction>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, inst: Instruction) {
        self.body.push(inst);
    }
}

/// One function's IR as fed into lowering: identity, parameters, and basic
/// blocks keyed by bytecode offset. Blocks keep creation order here; the
/// lowering context re-sorts them by offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionIr {
    pub qualname: String,
    /// Owning module; `None` for dynamically generated functions.
    pub module: Option<String>,
    pub doc: String,
    pub params: Vec<String>,
    pub blocks: IndexMap<usize, Block>,
}

impl FunctionIr {
    pub fn new(qualname: impl Into<String>, module: Option<String>, params: Vec<String>) -> Self {
        Self {
            qualname: qualname.into(),
            module,
            doc: String::new(),
            params,
            blocks: IndexMap::new(),
        }
    }

    pub fn add_block(&mut self, offset: usize) -> &mut Block {
        self.blocks.entry(offset).or_default()
    }

    /// The defining right-hand side of a variable, following
    /// variable-to-variable copies. Used by raise lowering to trace an
    /// exception instance back to its construction site.
    pub fn definition_of(&self, name: &str) -> Option<&RhsValue> {
        let mut seen = HashSet::new();
        let mut current = name;
        loop {
            if !seen.insert(current) {
                return None;
            }
            let def = self.blocks.values().flat_map(|b| &b.body).find_map(|inst| {
                match inst {
                    Instruction::Assign { target, value, .. } if target.name == current => {
                        Some(value)
                    }
                    _ => None,
                }
            })?;
            match def {
                RhsValue::Var(var) => current = &var.name,
                other => return Some(other),
            }
        }
    }
}
