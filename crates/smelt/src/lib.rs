/*! smelt - the lowering stage of a JIT compiler for a dynamically-typed
 * language.
 *
 * Re-exports the typed function IR (`smelt-ir`) and the lowering core
 * (`smelt-lower`). A compilation pipeline builds a [`FunctionDescriptor`]
 * from inferred typing results, constructs a [`Lower`] over a backend
 * implementing [`TargetContext`], and calls [`Lower::run`] to materialize
 * the function into its code library.
 */

pub use smelt_ir::{
    Block, Callee, Const, ExcClass, Expr, FunctionIr, Instruction, Loc, OpId, RhsValue, Signature,
    SignatureTable, Type, TypeMap, Var,
};
pub use smelt_lower::{
    default_mangler, dynamic_module, BlockRef, CallConv, CallHelper, Callable, CodeLibrary,
    DefaultHooks, Environment, FuncRef, FunctionDescriptor, ImplRef, LibRef, Lower, LowerError,
    LowerHooks, LowerOptions, Mangler, Module, ModuleRegistry, ReprRef, Result, TargetContext,
    UnitRef, ValueRef, DYNAMIC_MODULE,
};
