use crate::context::Lower;
use crate::errors::{LowerError, Result};
use crate::target::{CallConv, Callable, CodeLibrary, LowerHooks, TargetContext, ValueRef};
use smelt_ir::{Expr, Instruction, Loc, RhsValue, Type, Var};

impl<'a, B, C, L, H> Lower<'a, B, C, L, H>
where
    B: TargetContext,
    C: CallConv<B>,
    L: CodeLibrary,
    H: LowerHooks<B>,
{
    pub(crate) fn lower_inst(&mut self, inst: &Instruction) -> Result<()> {
        match inst {
            Instruction::Assign { target, value, .. } => {
                let ty = self.typeof_var(&target.name)?.clone();
                let val = self.lower_assign(&ty, value)?;
                self.store_var(val, &target.name)
            }

            Instruction::Branch {
                cond,
                true_dest,
                false_dest,
                ..
            } => {
                let condval = self.load_var(&cond.name)?;
                let tr = self.block_handle(*true_dest)?;
                let fl = self.block_handle(*false_dest)?;

                let condty = self.typeof_var(&cond.name)?.clone();
                let pred = self.ctx.cast(condval, &condty, &Type::Boolean)?;
                let bits = self.ctx.repr_bits(self.ctx.value_repr(pred));
                if bits != Some(1) {
                    return Err(LowerError::Consistency(format!(
                        "branch predicate is not one bit wide: {:?}",
                        bits
                    )));
                }
                self.ctx.cond_branch(pred, tr, fl);
                Ok(())
            }

            Instruction::Jump { target, .. } => {
                let dest = self.block_handle(*target)?;
                self.ctx.branch(dest);
                Ok(())
            }

            Instruction::Return { value, .. } => {
                let val = self.load_var(&value.name)?;
                let oty = self.typeof_var(&value.name)?.clone();
                let ty = self.fndesc.restype.clone();
                if ty.is_optional() {
                    // Optional returns use a different ABI than plain ones.
                    return self
                        .call_conv
                        .return_optional(&mut *self.ctx, &ty, &oty, val);
                }
                let val = if ty != oty {
                    self.ctx.cast(val, &oty, &ty)?
                } else {
                    val
                };
                let retval = self.ctx.outgoing_return(&ty, val);
                self.call_conv.return_value(&mut *self.ctx, retval);
                Ok(())
            }

            Instruction::SetItem {
                target,
                index,
                value,
                op_id,
                ..
            } => {
                let targetval = self.load_var(&target.name)?;
                let valueval = self.load_var(&value.name)?;
                let indexval = self.load_var(&index.name)?;

                let targetty = self.typeof_var(&target.name)?.clone();
                let valuety = self.typeof_var(&value.name)?.clone();
                let indexty = self.typeof_var(&index.name)?.clone();

                let sig = self.signature_of(*op_id)?.clone();
                let imp = self.ctx.get_function(Callable::Op("setitem"), &sig)?;

                // Item storage is only defined on the unwrapped type, so an
                // optional target is first coerced to its inner type.
                let targetval = if let Some(inner) = targetty.optional_inner() {
                    self.ctx.cast(targetval, &targetty, inner)?
                } else {
                    if targetty != *self.sig_param(&sig, 0)? {
                        return Err(LowerError::Consistency(format!(
                            "setitem target type {} does not match signature {}",
                            targetty, sig
                        )));
                    }
                    targetval
                };

                let indexval = {
                    let ft = self.sig_param(&sig, 1)?.clone();
                    self.ctx.cast(indexval, &indexty, &ft)?
                };
                let valueval = {
                    let ft = self.sig_param(&sig, 2)?.clone();
                    self.ctx.cast(valueval, &valuety, &ft)?
                };

                self.ctx
                    .call_implementation(imp, &[targetval, indexval, valueval])?;
                Ok(())
            }

            Instruction::SetAttr {
                target,
                attr,
                value,
                op_id,
                ..
            } => {
                let targetval = self.load_var(&target.name)?;
                let valueval = self.load_var(&value.name)?;

                let targetty = self.typeof_var(&target.name)?.clone();
                let valuety = self.typeof_var(&value.name)?.clone();

                let sig = self.signature_of(*op_id)?.clone();
                if *self.sig_param(&sig, 0)? != targetty {
                    return Err(LowerError::Consistency(format!(
                        "setattr target type {} does not match signature {}",
                        targetty, sig
                    )));
                }
                let imp = self.ctx.get_setattr(attr, &sig)?;

                let valueval = {
                    let ft = self.sig_param(&sig, 1)?.clone();
                    self.ctx.cast(valueval, &valuety, &ft)?
                };
                self.ctx.call_implementation(imp, &[targetval, valueval])?;
                Ok(())
            }

            Instruction::Raise { exception, loc } => self.lower_raise(exception.as_ref(), *loc),

            // Lifetime bookkeeping is handled entirely by the backend's
            // value handling.
            Instruction::Del { .. } => Ok(()),
        }
    }

    fn lower_raise(&mut self, exception: Option<&Var>, loc: Loc) -> Result<()> {
        let Some(exc) = exception else {
            // Re-raise the active exception.
            self.return_exception(None, None);
            return Ok(());
        };

        let excty = self.typeof_var(&exc.name)?.clone();
        match excty {
            Type::ExceptionInstance(class) => {
                // Raising an instance: trace back to the construction site,
                // which must be a plain call with constant-foldable
                // arguments.
                let func_ir = self.func_ir;
                let def = func_ir.definition_of(&exc.name);
                let Some(RhsValue::Expr(Expr::Call { args, kws, .. })) = def else {
                    return Err(LowerError::ForbiddenConstruct {
                        msg: "unsupported kind of raising".to_string(),
                        loc,
                    });
                };
                if !kws.is_empty() {
                    return Err(LowerError::ForbiddenConstruct {
                        msg: "unsupported kind of raising".to_string(),
                        loc,
                    });
                }
                let mut folded = Vec::with_capacity(args.len());
                for arg in args {
                    let constant = func_ir
                        .definition_of(&arg.name)
                        .and_then(|def| def.as_constant());
                    match constant {
                        Some(value) => folded.push(value.clone()),
                        None => {
                            return Err(LowerError::ForbiddenConstruct {
                                msg: format!(
                                    "exception argument '{}' is not a compile-time constant",
                                    arg.name
                                ),
                                loc,
                            })
                        }
                    }
                }
                self.return_exception(Some(&class), Some(&folded));
                Ok(())
            }
            Type::ExceptionClass(class) => {
                // Raising a bare exception type: no arguments.
                self.return_exception(Some(&class), None);
                Ok(())
            }
            other => Err(LowerError::ForbiddenConstruct {
                msg: format!("cannot raise value of type {}", other),
                loc,
            }),
        }
    }

    fn lower_assign(&mut self, ty: &Type, value: &RhsValue) -> Result<ValueRef> {
        match value {
            // Globals and closure variables are frozen like constants in
            // native compilation.
            RhsValue::Const { .. } | RhsValue::Global { .. } | RhsValue::FreeVar { .. } => {
                if ty.is_dummy_like() {
                    return Ok(self.ctx.dummy_value());
                }
                let payload = value.as_constant().ok_or_else(|| {
                    LowerError::Consistency(format!(
                        "constant reference of type {} has no materializable payload",
                        ty
                    ))
                })?;
                if matches!(ty, Type::Array { .. }) {
                    self.ctx.const_array(ty, payload)
                } else {
                    self.ctx.const_generic(ty, payload)
                }
            }

            RhsValue::Expr(expr) => self.lower_expr(ty, expr),

            RhsValue::Var(var) => {
                let val = self.load_var(&var.name)?;
                let oty = self.typeof_var(&var.name)?.clone();
                self.ctx.cast(val, &oty, ty)
            }
        }
    }
}
