use crate::descriptor::FunctionDescriptor;
use crate::errors::{LowerError, Result};
use crate::module_env::{Environment, ModuleRegistry};
use crate::target::{
    BlockRef, CallConv, CallHelper, CodeLibrary, DefaultHooks, FuncRef, LowerHooks, ReprRef,
    TargetContext, UnitRef, ValueRef,
};
use smelt_ir::{Block, Const, ExcClass, FunctionIr, Loc, OpId, Signature, Type};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default)]
pub struct LowerOptions {
    /// Write the finished backend unit to stderr, framed with the function
    /// descriptor, for offline inspection.
    pub dump_lowered: bool,
}

/// Compilation phases; every transition moves exactly one step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Initialized,
    ArgumentsBound,
    BlocksDeclared,
    PreLowered,
    BlocksLowered,
    PostLowered,
    Materialized,
}

/// A variable's storage slot: the stack pointer plus the representation it
/// was allocated with. The representation never changes after the first
/// store.
#[derive(Debug, Clone, Copy)]
struct Slot {
    ptr: ValueRef,
    repr: ReprRef,
}

/// Per-function lowering state: variable storage, block mapping, the active
/// insertion cursor, and the phase driver that walks all blocks in ascending
/// offset order.
pub struct Lower<'a, B, C, L, H = DefaultHooks>
where
    B: TargetContext,
    C: CallConv<B>,
    L: CodeLibrary,
    H: LowerHooks<B>,
{
    pub(crate) ctx: &'a mut B,
    pub(crate) call_conv: C,
    pub(crate) library: &'a mut L,
    hooks: H,
    pub(crate) fndesc: &'a FunctionDescriptor,
    pub(crate) func_ir: &'a FunctionIr,
    options: LowerOptions,
    env: Environment,
    pub(crate) unit: UnitRef,
    pub(crate) func: FuncRef,
    entry_block: BlockRef,
    call_helper: CallHelper,
    /// Blocks in address order; the lowest offset is the entry block of the
    /// user code.
    blocks: BTreeMap<usize, &'a Block>,
    blkmap: HashMap<usize, BlockRef>,
    varmap: HashMap<String, Slot>,
    firstblk: usize,
    pub(crate) loc: Loc,
    phase: Phase,
}

impl<'a, B, C, L> Lower<'a, B, C, L, DefaultHooks>
where
    B: TargetContext,
    C: CallConv<B>,
    L: CodeLibrary,
{
    pub fn new(
        ctx: &'a mut B,
        call_conv: C,
        library: &'a mut L,
        registry: &ModuleRegistry,
        fndesc: &'a FunctionDescriptor,
        func_ir: &'a FunctionIr,
    ) -> Result<Self> {
        Self::with_hooks(
            ctx,
            call_conv,
            library,
            registry,
            fndesc,
            func_ir,
            DefaultHooks,
            LowerOptions::default(),
        )
    }
}

impl<'a, B, C, L, H> Lower<'a, B, C, L, H>
where
    B: TargetContext,
    C: CallConv<B>,
    L: CodeLibrary,
    H: LowerHooks<B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn with_hooks(
        ctx: &'a mut B,
        mut call_conv: C,
        library: &'a mut L,
        registry: &ModuleRegistry,
        fndesc: &'a FunctionDescriptor,
        func_ir: &'a FunctionIr,
        mut hooks: H,
        options: LowerOptions,
    ) -> Result<Self> {
        let blocks: BTreeMap<usize, &'a Block> =
            func_ir.blocks.iter().map(|(k, v)| (*k, v)).collect();
        let firstblk = *blocks.keys().next().ok_or_else(|| {
            LowerError::Consistency(format!("function '{}' has no basic blocks", fndesc.qualname))
        })?;

        let unit = ctx.create_unit(&fndesc.unique_name);

        // The execution environment gives the generated code access to
        // module-level globals and closure-frozen values at run time.
        let env = Environment::new(fndesc.resolve_module(registry)?);

        let func = ctx.declare_function(unit, fndesc);
        let entry_block = ctx.append_block(func, "entry");
        ctx.position_at_end(entry_block);
        let call_helper = call_conv.init_call_helper(ctx);

        hooks.init(fndesc);

        Ok(Self {
            ctx,
            call_conv,
            library,
            hooks,
            fndesc,
            func_ir,
            options,
            env,
            unit,
            func,
            entry_block,
            call_helper,
            blocks,
            blkmap: HashMap::new(),
            varmap: HashMap::new(),
            firstblk,
            loc: Loc::UNKNOWN,
            phase: Phase::Initialized,
        })
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        self.fndesc
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn call_helper(&self) -> CallHelper {
        self.call_helper
    }

    /// The synthetic entry block hosting argument setup and hook-injected
    /// code.
    pub fn entry_block(&self) -> BlockRef {
        self.entry_block
    }

    fn advance(&mut self, next: Phase) -> Result<()> {
        if next as u8 != self.phase as u8 + 1 {
            return Err(LowerError::Consistency(format!(
                "phase transition {:?} -> {:?} skips a step",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Run the full lowering sequence and materialize the unit into the
    /// code library. Single-shot; a second call is a consistency failure.
    pub fn run(&mut self) -> Result<()> {
        if self.phase != Phase::Initialized {
            return Err(LowerError::Consistency(
                "lowering already ran for this context".to_string(),
            ));
        }

        // Bind arguments: marshal each incoming value, convert it to the
        // parameter's declared type, and perform the variable's first store.
        debug!(function = %self.fndesc.unique_name, "binding arguments");
        let argvals =
            self.call_conv
                .incoming_arguments(&mut *self.ctx, self.func, self.fndesc.args.len());
        let params: Vec<String> = self.fndesc.args.clone();
        for (name, raw) in params.iter().zip(argvals) {
            let at = self.typeof_var(name)?.clone();
            let av = self.ctx.incoming_argument(&at, raw);
            let av = self.hooks.init_argument(&mut *self.ctx, av);
            self.store_var(av, name)?;
        }
        self.advance(Phase::ArgumentsBound)?;

        // Declare every block up front so forward branches can be resolved
        // before their targets are lowered.
        for &offset in self.blocks.keys() {
            let handle = self.ctx.append_block(self.func, &format!("B{}", offset));
            self.blkmap.insert(offset, handle);
        }
        self.advance(Phase::BlocksDeclared)?;

        self.hooks.pre_lower(&mut *self.ctx, self.fndesc);
        // pre_lower may have moved the cursor; remember where the entry
        // block now ends so it can be closed once lowering is done.
        let entry_block_tail = self.ctx.current_block();
        self.advance(Phase::PreLowered)?;

        let blocks: Vec<(usize, &'a Block)> = self.blocks.iter().map(|(k, v)| (*k, *v)).collect();
        for (offset, block) in blocks {
            debug!(offset, "lowering block");
            let handle = self.block_handle(offset)?;
            self.ctx.position_at_end(handle);
            self.lower_block(block)?;
        }
        self.advance(Phase::BlocksLowered)?;

        self.hooks.post_lower(&mut *self.ctx, self.fndesc);
        self.advance(Phase::PostLowered)?;

        // Close the tail of the entry block: it exists purely to host
        // argument setup and hook-injected code before user code runs.
        self.ctx.position_at_end(entry_block_tail);
        let first = self.block_handle(self.firstblk)?;
        self.ctx.branch(first);

        self.ctx.post_lowering(self.func);

        if self.options.dump_lowered {
            eprintln!("{:-^80}", format!(" lowered dump {} ", self.fndesc));
            eprintln!("{}", self.ctx.dump_unit(self.unit));
            eprintln!("{}", "=".repeat(80));
        }

        self.library.add_unit(self.unit);
        self.advance(Phase::Materialized)
    }

    /// Request the boundary wrapper that lets dynamically-typed callers
    /// invoke this compiled function.
    pub fn create_host_wrapper(&mut self, release_lock: bool) -> Result<()> {
        self.ctx
            .build_host_wrapper(self.fndesc, self.call_helper, release_lock)
    }

    fn lower_block(&mut self, block: &Block) -> Result<()> {
        for inst in &block.body {
            self.loc = inst.loc();
            trace!(loc = %self.loc, ?inst, "lowering instruction");
            match self.lower_inst(inst) {
                Ok(()) => {}
                // Located failures already carry precise diagnostic context.
                Err(err) if err.is_located() => return Err(err),
                Err(err) => {
                    return Err(LowerError::Lowering {
                        msg: format!("Internal error:\n{}: {}", err.kind_name(), err),
                        loc: inst.loc(),
                    })
                }
            }
        }
        Ok(())
    }

    pub(crate) fn typeof_var(&self, name: &str) -> Result<&Type> {
        self.fndesc.typemap.get(name).ok_or_else(|| {
            LowerError::Consistency(format!("no type recorded for variable '{}'", name))
        })
    }

    pub(crate) fn signature_of(&self, op_id: OpId) -> Result<&Signature> {
        self.fndesc.calltypes.get(op_id).ok_or_else(|| {
            LowerError::Consistency(format!("no signature recorded for operation {}", op_id))
        })
    }

    pub(crate) fn sig_param<'s>(&self, sig: &'s Signature, index: usize) -> Result<&'s Type> {
        sig.params.get(index).ok_or_else(|| {
            LowerError::Consistency(format!(
                "signature {} has no parameter at position {}",
                sig, index
            ))
        })
    }

    pub(crate) fn block_handle(&self, offset: usize) -> Result<BlockRef> {
        self.blkmap.get(&offset).copied().ok_or_else(|| {
            LowerError::Consistency(format!("branch to unmapped block offset {}", offset))
        })
    }

    /// Current storage of a variable; it must have been stored before.
    pub(crate) fn load_var(&mut self, name: &str) -> Result<ValueRef> {
        let slot = self.varmap.get(name).copied().ok_or_else(|| {
            LowerError::Consistency(format!("variable '{}' loaded before first store", name))
        })?;
        Ok(self.ctx.load(slot.ptr))
    }

    /// Store a value under a variable name, allocating the slot on first
    /// use. The slot's representation is fixed by the first store.
    pub(crate) fn store_var(&mut self, value: ValueRef, name: &str) -> Result<()> {
        let repr = self.ctx.value_repr(value);
        let slot = match self.varmap.get(name) {
            Some(slot) => *slot,
            None => {
                let ptr = self.ctx.alloca(repr, name);
                let slot = Slot { ptr, repr };
                self.varmap.insert(name.to_string(), slot);
                slot
            }
        };
        if slot.repr != repr {
            return Err(LowerError::Consistency(format!(
                "store of representation {:?} into slot of {:?} for '{}'",
                repr, slot.repr, name
            )));
        }
        self.ctx.store(value, slot.ptr);
        Ok(())
    }

    /// Allocate storage sized for a semantic type.
    pub fn alloca_type(&mut self, name: &str, ty: &Type) -> ValueRef {
        let repr = self.ctx.type_repr(ty);
        self.ctx.alloca(repr, name)
    }

    /// Emit a structured exception return through the calling convention.
    pub(crate) fn return_exception(&mut self, class: Option<&ExcClass>, args: Option<&[Const]>) {
        self.call_conv.return_exception(&mut *self.ctx, class, args);
    }
}
