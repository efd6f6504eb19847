use crate::context::Lower;
use crate::descriptor::FunctionDescriptor;
use crate::errors::{LowerError, Result};
use crate::target::{CallConv, Callable, CodeLibrary, LowerHooks, TargetContext, ValueRef};
use smelt_ir::{Callee, ExcClass, Expr, OpId, Signature, Type, Var};

/// Resolved callee of a call expression: an operation name (intrinsics) or
/// the callee variable's declared type.
enum CalleeKind<'e> {
    Named(&'e str),
    Typed(Type),
}

/// Bind positional and keyword arguments to the canonical positional order
/// of `params`, rejecting any unconsumed keyword residue.
fn bind_arguments<'v>(
    params: &[String],
    args: &'v [Var],
    kws: &'v [(String, Var)],
) -> std::result::Result<Vec<&'v Var>, String> {
    if args.len() > params.len() {
        return Err(format!(
            "too many positional arguments: {} for {}",
            args.len(),
            params.len()
        ));
    }
    let mut slots: Vec<Option<&Var>> = vec![None; params.len()];
    for (slot, arg) in slots.iter_mut().zip(args) {
        *slot = Some(arg);
    }
    for (name, var) in kws {
        let Some(pos) = params.iter().position(|p| p == name) else {
            return Err(format!("unexpected keyword argument '{}'", name));
        };
        if slots[pos].is_some() {
            return Err(format!("duplicate value for argument '{}'", name));
        }
        slots[pos] = Some(var);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| format!("missing argument '{}'", params[i])))
        .collect()
}

impl<'a, B, C, L, H> Lower<'a, B, C, L, H>
where
    B: TargetContext,
    C: CallConv<B>,
    L: CodeLibrary,
    H: LowerHooks<B>,
{
    /// Lower one expression to a value of the declared result type `resty`.
    pub(crate) fn lower_expr(&mut self, resty: &Type, expr: &Expr) -> Result<ValueRef> {
        match expr {
            Expr::BinOp {
                op,
                lhs,
                rhs,
                op_id,
            } => self.lower_binop(resty, op, lhs, rhs, *op_id),

            Expr::InplaceBinOp {
                op,
                lhs,
                rhs,
                op_id,
            } => {
                let lty = self.typeof_var(&lhs.name)?.clone();
                if !lty.is_mutable() {
                    // In-place mutation is only observable for mutable
                    // types; immutable operands reuse the copying operator.
                    self.lower_binop(resty, op, lhs, rhs, *op_id)
                } else {
                    Err(LowerError::Unimplemented(format!(
                        "in-place operator '{}' on mutable type {}",
                        op, lty
                    )))
                }
            }

            Expr::UnaryOp { op, value, op_id } => {
                let val = self.load_var(&value.name)?;
                let ty = self.typeof_var(&value.name)?.clone();
                let sig = self.signature_of(*op_id)?.clone();
                let imp = self.ctx.get_function(Callable::Op(op), &sig)?;
                let ft = self.sig_param(&sig, 0)?.clone();
                let val = self.ctx.cast(val, &ty, &ft)?;
                let res = self.ctx.call_implementation(imp, &[val])?;
                self.ctx.cast(res, &sig.return_type, resty)
            }

            Expr::Call {
                callee,
                args,
                kws,
                op_id,
            } => self.lower_call(resty, callee, args, kws, *op_id),

            Expr::PairFirst { value } => {
                let val = self.load_var(&value.name)?;
                let ty = self.typeof_var(&value.name)?.clone();
                let (first, _) = self.pair_element_types(&ty)?;
                let first = first.clone();
                let item = self.ctx.pair_first(val, &ty);
                // Pair components use a different storage form than
                // standalone values; re-marshal as an incoming argument.
                Ok(self.ctx.incoming_argument(&first, item))
            }

            Expr::PairSecond { value } => {
                let val = self.load_var(&value.name)?;
                let ty = self.typeof_var(&value.name)?.clone();
                let (_, second) = self.pair_element_types(&ty)?;
                let second = second.clone();
                let item = self.ctx.pair_second(val, &ty);
                Ok(self.ctx.incoming_argument(&second, item))
            }

            Expr::GetIter { value, op_id } => self.lower_iter_op(resty, "getiter", value, *op_id),
            Expr::IterNext { value, op_id } => self.lower_iter_op(resty, "iternext", value, *op_id),

            Expr::ExhaustIter { value, count } => self.lower_exhaust_iter(resty, value, *count),

            Expr::GetAttr { value, attr } => {
                let val = self.load_var(&value.name)?;
                let ty = self.typeof_var(&value.name)?.clone();
                if matches!(resty, Type::BoundFunction { .. }) {
                    // Typed upstream as a method access; build the bound
                    // function object directly from the receiver.
                    Ok(self.ctx.bound_function(val, &ty))
                } else {
                    match self.ctx.get_attribute(&ty, attr) {
                        // The attribute has no runtime representation and is
                        // intentionally ignored.
                        None => Ok(self.ctx.dummy_value()),
                        Some(imp) => self.ctx.call_implementation(imp, &[val]),
                    }
                }
            }

            Expr::StaticGetItem { value, index } => {
                let baseval = self.load_var(&value.name)?;
                if self.ctx.is_struct_repr(self.ctx.value_repr(baseval)) {
                    // Structures are not dynamically indexable; extract the
                    // field at the literal index.
                    let idx = usize::try_from(*index).map_err(|_| {
                        LowerError::Consistency(format!(
                            "static structure index {} out of range",
                            index
                        ))
                    })?;
                    Ok(self.ctx.extract_element(baseval, idx))
                } else {
                    // Fall back on the generic getitem at the literal index.
                    let ty = self.typeof_var(&value.name)?.clone();
                    let sig = Signature::new(resty.clone(), vec![ty, Type::intp()]);
                    let imp = self.ctx.get_function(Callable::Op("getitem"), &sig)?;
                    let indexval = self.ctx.const_index(*index);
                    let res = self.ctx.call_implementation(imp, &[baseval, indexval])?;
                    self.ctx.cast(res, &sig.return_type, resty)
                }
            }

            Expr::GetItem {
                value,
                index,
                op_id,
            } => {
                let baseval = self.load_var(&value.name)?;
                let indexval = self.load_var(&index.name)?;
                let basety = self.typeof_var(&value.name)?.clone();
                let indexty = self.typeof_var(&index.name)?.clone();
                let sig = self.signature_of(*op_id)?.clone();
                let imp = self.ctx.get_function(Callable::Op("getitem"), &sig)?;
                let baseval = {
                    let ft = self.sig_param(&sig, 0)?.clone();
                    self.ctx.cast(baseval, &basety, &ft)?
                };
                let indexval = {
                    let ft = self.sig_param(&sig, 1)?.clone();
                    self.ctx.cast(indexval, &indexty, &ft)?
                };
                let res = self.ctx.call_implementation(imp, &[baseval, indexval])?;
                self.ctx.cast(res, &sig.return_type, resty)
            }

            Expr::BuildTuple { items } => {
                let slot_types = resty.element_types().ok_or_else(|| {
                    LowerError::Consistency(format!("build_tuple into non-tuple type {}", resty))
                })?;
                if slot_types.len() != items.len() {
                    return Err(LowerError::Consistency(format!(
                        "build_tuple of {} items into {}-slot type {}",
                        items.len(),
                        slot_types.len(),
                        resty
                    )));
                }
                let mut tup = self.ctx.const_undef(resty);
                for (i, (item, slot_ty)) in items.iter().zip(&slot_types).enumerate() {
                    let val = self.load_var(&item.name)?;
                    let fromty = self.typeof_var(&item.name)?.clone();
                    let cast = self.ctx.cast(val, &fromty, slot_ty)?;
                    tup = self.ctx.insert_element(tup, cast, i);
                }
                Ok(tup)
            }

            Expr::Cast { value } => {
                let val = self.load_var(&value.name)?;
                let ty = self.typeof_var(&value.name)?.clone();
                self.ctx.cast(val, &ty, resty)
            }
        }
    }

    fn lower_binop(
        &mut self,
        resty: &Type,
        op: &str,
        lhs: &Var,
        rhs: &Var,
        op_id: OpId,
    ) -> Result<ValueRef> {
        let lty = self.typeof_var(&lhs.name)?.clone();
        let rty = self.typeof_var(&rhs.name)?.clone();
        let lval = self.load_var(&lhs.name)?;
        let rval = self.load_var(&rhs.name)?;
        let sig = self.signature_of(op_id)?.clone();
        let imp = self.ctx.get_function(Callable::Op(op), &sig)?;
        let lval = {
            let ft = self.sig_param(&sig, 0)?.clone();
            self.ctx.cast(lval, &lty, &ft)?
        };
        let rval = {
            let ft = self.sig_param(&sig, 1)?.clone();
            self.ctx.cast(rval, &rty, &ft)?
        };
        let res = self.ctx.call_implementation(imp, &[lval, rval])?;
        self.ctx.cast(res, &sig.return_type, resty)
    }

    fn lower_iter_op(
        &mut self,
        resty: &Type,
        op: &str,
        value: &Var,
        op_id: OpId,
    ) -> Result<ValueRef> {
        let val = self.load_var(&value.name)?;
        let ty = self.typeof_var(&value.name)?.clone();
        let sig = self.signature_of(op_id)?.clone();
        let imp = self.ctx.get_function(Callable::Op(op), &sig)?;
        let ft = self.sig_param(&sig, 0)?.clone();
        let castval = self.ctx.cast(val, &ty, &ft)?;
        let res = self.ctx.call_implementation(imp, &[castval])?;
        self.ctx.cast(res, &sig.return_type, resty)
    }

    fn lower_call(
        &mut self,
        resty: &Type,
        callee: &Callee,
        args: &[Var],
        kws: &[(String, Var)],
        op_id: OpId,
    ) -> Result<ValueRef> {
        let sig = self.signature_of(op_id)?.clone();

        let (fnty, castvals, func_var): (CalleeKind<'_>, Vec<ValueRef>, Option<&Var>) =
            match callee {
                // Intrinsic arguments are pre-built backend values; nothing
                // is loaded or coerced.
                Callee::Intrinsic { name, args } => {
                    (CalleeKind::Named(name), args.to_vec(), None)
                }
                Callee::Var(func_var) => {
                    let fnty = self.typeof_var(&func_var.name)?.clone();
                    let bound: Vec<&Var> = if !kws.is_empty() {
                        // Fold keyword arguments into positional order; only
                        // callees with a bindable parameter signature
                        // support this.
                        let params = fnty.param_names().ok_or_else(|| LowerError::Lowering {
                            msg: format!("unsupported keyword arguments when calling {}", fnty),
                            loc: self.loc,
                        })?;
                        bind_arguments(params, args, kws).map_err(|msg| LowerError::Lowering {
                            msg,
                            loc: self.loc,
                        })?
                    } else {
                        args.iter().collect()
                    };
                    let mut castvals = Vec::with_capacity(bound.len());
                    for (i, arg) in bound.iter().enumerate() {
                        let av = self.load_var(&arg.name)?;
                        let at = self.typeof_var(&arg.name)?.clone();
                        let ft = self.sig_param(&sig, i)?.clone();
                        castvals.push(self.ctx.cast(av, &at, &ft)?);
                    }
                    (CalleeKind::Typed(fnty), castvals, Some(func_var))
                }
            };

        let res = match &fnty {
            CalleeKind::Typed(Type::ExternalFunction {
                symbol,
                sig: ext_sig,
            }) => {
                // Named external symbol: synthesize a descriptor and go
                // through the external-call path.
                let fndesc = FunctionDescriptor::external(
                    symbol,
                    ext_sig.return_type.clone(),
                    ext_sig.params.clone(),
                );
                let func = self.ctx.declare_external_function(self.unit, &fndesc);
                self.ctx.call_external(func, &fndesc.argtypes, &castvals)?
            }

            CalleeKind::Typed(Type::Method { .. }) => {
                let fnobj = self.load_method_receiver(func_var)?;
                self.ctx.call_method(fnobj, &sig, &castvals)?
            }

            CalleeKind::Typed(Type::FunctionPointer { address, cconv }) => {
                self.ctx
                    .call_pointer(*address, &sig, &castvals, cconv.as_deref())?
            }

            _ => {
                if matches!(sig.return_type, Type::Phantom) {
                    // The call produces no value at all; emit nothing.
                    return Ok(self.ctx.dummy_value());
                }
                let key = match &fnty {
                    CalleeKind::Named(name) => Callable::Op(name),
                    CalleeKind::Typed(ty) => Callable::Value(ty),
                };
                let imp = self.ctx.get_function(key, &sig)?;
                let mut callvals = castvals;
                if sig.recv.is_some() {
                    // Bound function: the receiver is the function object
                    // itself, prepended to the argument list.
                    let recv = self.load_method_receiver(func_var)?;
                    callvals.insert(0, recv);
                }
                let res = self.ctx.call_implementation(imp, &callvals)?;
                // Codegen for this call may have pulled in helper routines.
                for lib in self.ctx.implementation_libraries(imp) {
                    self.library.add_linking_library(lib);
                }
                res
            }
        };

        self.ctx.cast(res, &sig.return_type, resty)
    }

    fn load_method_receiver(&mut self, func_var: Option<&Var>) -> Result<ValueRef> {
        let var = func_var.ok_or_else(|| {
            LowerError::Consistency("bound receiver on an intrinsic call".to_string())
        })?;
        self.load_var(&var.name)
    }

    fn lower_exhaust_iter(&mut self, resty: &Type, value: &Var, count: usize) -> Result<ValueRef> {
        let val = self.load_var(&value.name)?;
        let ty = self.typeof_var(&value.name)?.clone();

        // A heterogeneous tuple is already in final form and cannot be
        // iterated anyway.
        if matches!(ty, Type::Tuple(_)) {
            return Ok(val);
        }

        let iterty = ty.iterator_type().ok_or_else(|| {
            LowerError::Consistency(format!("exhaust_iter over non-iterable type {}", ty))
        })?;
        let itemty = iterty
            .yield_type()
            .ok_or_else(|| {
                LowerError::Consistency(format!("iterator type {} has no yield type", iterty))
            })?
            .clone();

        let pairty = Type::Pair(Box::new(itemty), Box::new(Type::Boolean));
        let getiter_sig = Signature::new(iterty.clone(), vec![ty.clone()]);
        let getiter_impl = self.ctx.get_function(Callable::Op("getiter"), &getiter_sig)?;
        let iternext_sig = Signature::new(pairty.clone(), vec![iterty]);
        let iternext_impl = self
            .ctx
            .get_function(Callable::Op("iternext"), &iternext_sig)?;

        let mut tup = self.ctx.const_undef(resty);
        let iterobj = self.ctx.call_implementation(getiter_impl, &[val])?;

        // Draw exactly `count` items, failing fast on early exhaustion.
        for i in 0..count {
            let pair = self.ctx.call_implementation(iternext_impl, &[iterobj])?;
            let is_valid = self.ctx.pair_second(pair, &pairty);
            let invalid = self.ctx.bool_not(is_valid);
            self.emit_unlikely_exception(invalid, ExcClass::ValueError);
            let item = self.ctx.pair_first(pair, &pairty);
            tup = self.ctx.insert_element(tup, item, i);
        }

        // One more probe: anything left over means the source was too long.
        let pair = self.ctx.call_implementation(iternext_impl, &[iterobj])?;
        let is_valid = self.ctx.pair_second(pair, &pairty);
        self.emit_unlikely_exception(is_valid, ExcClass::ValueError);

        Ok(tup)
    }

    /// Branch to a cold block that raises `class`, then continue on the
    /// likely path.
    fn emit_unlikely_exception(&mut self, cond: ValueRef, class: ExcClass) {
        let raise_block = self.ctx.append_block(self.func, "raise");
        let cont_block = self.ctx.append_block(self.func, "endraise");
        self.ctx.cond_branch_unlikely(cond, raise_block, cont_block);
        self.ctx.position_at_end(raise_block);
        self.return_exception(Some(&class), None);
        self.ctx.position_at_end(cont_block);
    }

    fn pair_element_types<'t>(&self, ty: &'t Type) -> Result<(&'t Type, &'t Type)> {
        ty.pair_types().ok_or_else(|| {
            LowerError::Consistency(format!("pair decomposition of non-pair type {}", ty))
        })
    }
}
