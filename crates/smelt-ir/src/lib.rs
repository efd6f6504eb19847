/*! Typed, block-structured function IR for the smelt JIT lowering core.
 *
 * Lowering needs an IR where every variable and every operation already has a
 * resolved type: the structures here carry the source program shape plus the
 * two artifacts handed over by type inference (the variable type map and the
 * per-operation signature table). Nothing in this crate re-derives types.
 */

pub mod ir;
pub mod loc;
pub mod types;
pub mod typing;
pub mod values;

pub use ir::{Block, Callee, Expr, FunctionIr, Instruction, RhsValue, ValueRef, Var};
pub use loc::Loc;
pub use types::{ExcClass, Signature, Type};
pub use typing::{OpId, SignatureTable, TypeMap};
pub use values::Const;
