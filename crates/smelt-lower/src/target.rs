use crate::descriptor::FunctionDescriptor;
use crate::errors::Result;
use smelt_ir::{Const, ExcClass, Signature, Type};

pub use smelt_ir::ValueRef;

/// Handle to a basic block in the backend function under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub u32);

/// Handle to a declared backend function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub u32);

/// Handle to one backend compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitRef(pub u32);

/// Handle to a backend value representation (the machine-level type of a
/// value, as opposed to its semantic [`Type`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReprRef(pub u32);

/// Handle to a resolved operation implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImplRef(pub u32);

/// Handle to an auxiliary library an implementation wants linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibRef(pub u32);

/// Handle to the calling convention's structured-exception bookkeeping
/// state for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHelper(pub u32);

/// Key for operation resolution: either a named protocol operation
/// (`"setitem"`, `"getiter"`, a binary operator spelling) or the resolved
/// type of an ordinary callee.
#[derive(Debug, Clone, Copy)]
pub enum Callable<'a> {
    Op(&'a str),
    Value(&'a Type),
}

/// Target-specific code generation context.
///
/// Supplies every operation lowering needs from the backend: operation
/// implementations, coercion, constant materialization, value marshaling,
/// and emission primitives. One implementation of this trait is used from a
/// single thread for the duration of one function's lowering; the core
/// performs no locking.
pub trait TargetContext {
    // Compilation-unit lifecycle.
    fn create_unit(&mut self, name: &str) -> UnitRef;
    fn declare_function(&mut self, unit: UnitRef, desc: &FunctionDescriptor) -> FuncRef;
    fn declare_external_function(&mut self, unit: UnitRef, desc: &FunctionDescriptor) -> FuncRef;
    fn append_block(&mut self, func: FuncRef, name: &str) -> BlockRef;

    // Insertion cursor.
    fn position_at_end(&mut self, block: BlockRef);
    fn current_block(&self) -> BlockRef;

    // Control flow.
    fn branch(&mut self, dest: BlockRef);
    fn cond_branch(&mut self, cond: ValueRef, then_dest: BlockRef, else_dest: BlockRef);
    /// Conditional branch whose first destination is statically cold; used
    /// for fail-fast exception paths.
    fn cond_branch_unlikely(&mut self, cond: ValueRef, unlikely: BlockRef, likely: BlockRef);
    fn bool_not(&mut self, value: ValueRef) -> ValueRef;

    // Variable storage.
    fn alloca(&mut self, repr: ReprRef, name: &str) -> ValueRef;
    fn load(&mut self, ptr: ValueRef) -> ValueRef;
    fn store(&mut self, value: ValueRef, ptr: ValueRef);

    // Representation queries.
    fn type_repr(&mut self, ty: &Type) -> ReprRef;
    fn value_repr(&self, value: ValueRef) -> ReprRef;
    /// Bit width of a representation, when it has a fixed scalar width.
    fn repr_bits(&self, repr: ReprRef) -> Option<u32>;
    fn is_struct_repr(&self, repr: ReprRef) -> bool;

    // Coercion, constants and marshaling.
    fn cast(&mut self, value: ValueRef, from: &Type, to: &Type) -> Result<ValueRef>;
    fn const_generic(&mut self, ty: &Type, value: &Const) -> Result<ValueRef>;
    fn const_array(&mut self, ty: &Type, value: &Const) -> Result<ValueRef>;
    fn const_index(&mut self, value: i64) -> ValueRef;
    fn const_undef(&mut self, ty: &Type) -> ValueRef;
    /// Placeholder result for types with no runtime representation.
    fn dummy_value(&mut self) -> ValueRef;
    fn incoming_argument(&mut self, ty: &Type, raw: ValueRef) -> ValueRef;
    fn outgoing_return(&mut self, ty: &Type, value: ValueRef) -> ValueRef;

    // Aggregates and the iterator pair protocol.
    fn insert_element(&mut self, agg: ValueRef, elem: ValueRef, index: usize) -> ValueRef;
    fn extract_element(&mut self, agg: ValueRef, index: usize) -> ValueRef;
    fn pair_first(&mut self, pair: ValueRef, ty: &Type) -> ValueRef;
    fn pair_second(&mut self, pair: ValueRef, ty: &Type) -> ValueRef;

    // Operation resolution and invocation.
    fn get_function(&mut self, callee: Callable<'_>, sig: &Signature) -> Result<ImplRef>;
    fn get_setattr(&mut self, attr: &str, sig: &Signature) -> Result<ImplRef>;
    /// Attribute-access implementation, or `None` when the attribute has no
    /// runtime representation and is intentionally ignored.
    fn get_attribute(&mut self, ty: &Type, attr: &str) -> Option<ImplRef>;
    fn call_implementation(&mut self, imp: ImplRef, args: &[ValueRef]) -> Result<ValueRef>;
    /// Auxiliary libraries the implementation's codegen pulled in; merged
    /// into the unit's link set by the caller.
    fn implementation_libraries(&self, imp: ImplRef) -> Vec<LibRef>;

    // Direct call emission.
    fn call_external(
        &mut self,
        func: FuncRef,
        argtypes: &[Type],
        args: &[ValueRef],
    ) -> Result<ValueRef>;
    fn call_method(
        &mut self,
        receiver: ValueRef,
        sig: &Signature,
        args: &[ValueRef],
    ) -> Result<ValueRef>;
    fn call_pointer(
        &mut self,
        address: u64,
        sig: &Signature,
        args: &[ValueRef],
        cconv: Option<&str>,
    ) -> Result<ValueRef>;
    fn bound_function(&mut self, value: ValueRef, ty: &Type) -> ValueRef;

    // Finishing.
    /// Target-specific transformation over the finished function.
    fn post_lowering(&mut self, func: FuncRef);
    /// Build the boundary wrapper that lets dynamically-typed callers invoke
    /// this function.
    fn build_host_wrapper(
        &mut self,
        desc: &FunctionDescriptor,
        helper: CallHelper,
        release_lock: bool,
    ) -> Result<()>;
    /// Textual form of the unit, for the diagnostic dump side channel.
    fn dump_unit(&self, unit: UnitRef) -> String;
}

/// Argument/return marshaling and structured-exception encoding.
pub trait CallConv<B: TargetContext> {
    fn init_call_helper(&mut self, ctx: &mut B) -> CallHelper;
    /// The marshaled incoming argument values of the declared function.
    fn incoming_arguments(&mut self, ctx: &mut B, func: FuncRef, count: usize) -> Vec<ValueRef>;
    fn return_value(&mut self, ctx: &mut B, value: ValueRef);
    /// Optional returns use a different ABI than plain returns; handles both
    /// the present and absent cases, including present-case coercion.
    fn return_optional(
        &mut self,
        ctx: &mut B,
        declared: &Type,
        actual: &Type,
        value: ValueRef,
    ) -> Result<()>;
    /// Structured exception return. Both `class` and `args` absent encodes a
    /// re-raise of the active exception.
    fn return_exception(&mut self, ctx: &mut B, class: Option<&ExcClass>, args: Option<&[Const]>);
}

/// Storage and linking of finished compilation units.
pub trait CodeLibrary {
    fn add_unit(&mut self, unit: UnitRef);
    fn add_linking_library(&mut self, lib: LibRef);
}

/// Per-variant lowering hooks, injected at context construction. The native
/// path uses the no-op defaults; other execution modes override individual
/// points (e.g. resource registration on argument entry).
pub trait LowerHooks<B: TargetContext> {
    fn init(&mut self, _desc: &FunctionDescriptor) {}
    /// Runs before any block is lowered; may emit into the entry block.
    fn pre_lower(&mut self, _ctx: &mut B, _desc: &FunctionDescriptor) {}
    /// Runs after all blocks are lowered.
    fn post_lower(&mut self, _ctx: &mut B, _desc: &FunctionDescriptor) {}
    /// Conversion applied to each incoming argument after marshaling.
    fn init_argument(&mut self, _ctx: &mut B, arg: ValueRef) -> ValueRef {
        arg
    }
}

/// The native lowering variant: every hook is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl<B: TargetContext> LowerHooks<B> for DefaultHooks {}
