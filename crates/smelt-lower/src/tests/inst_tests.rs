use super::mock::{Event, MockBackend};
use super::{i64t, loc, lower_run, lower_run_with, typemap, v};
use crate::errors::LowerError;
use pretty_assertions::assert_eq;
use smelt_ir::{
    Callee, Const, ExcClass, Expr, FunctionIr, Instruction, OpId, RhsValue, Signature,
    SignatureTable, Type,
};

fn array_i64() -> Type {
    Type::Array {
        element: Box::new(i64t()),
        ndim: 1,
    }
}

#[test]
fn branch_coerces_condition_to_one_bit() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["c".to_string()]);
    ir.add_block(0).push(Instruction::Branch {
        cond: v("c"),
        true_dest: 10,
        false_dest: 20,
        loc: loc(1),
    });
    ir.add_block(10).push(Instruction::Return {
        value: v("c"),
        loc: loc(2),
    });
    ir.add_block(20).push(Instruction::Return {
        value: v("c"),
        loc: loc(3),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("c", Type::Boolean)]),
        Type::Boolean,
        SignatureTable::new(),
    );
    result.unwrap();

    assert!(backend.events.contains(&Event::Cast {
        from: Type::Boolean,
        to: Type::Boolean,
    }));
    let b10 = backend.block_named("B10").unwrap();
    let b20 = backend.block_named("B20").unwrap();
    assert_eq!(
        backend.count(|e| matches!(
            e,
            Event::CondBranch {
                then_dest,
                else_dest,
                unlikely: false,
                ..
            } if *then_dest == b10 && *else_dest == b20
        )),
        1
    );
}

#[test]
fn non_boolean_predicate_width_trips_the_assertion() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["c".to_string()]);
    ir.add_block(0).push(Instruction::Branch {
        cond: v("c"),
        true_dest: 10,
        false_dest: 10,
        loc: loc(4),
    });
    ir.add_block(10).push(Instruction::Return {
        value: v("c"),
        loc: loc(5),
    });

    let mut backend = MockBackend::new();
    backend.boolean_bits = 8;
    let (_, _, result) = lower_run_with(
        backend,
        &ir,
        typemap(&[("c", Type::Boolean)]),
        Type::Boolean,
        SignatureTable::new(),
    );
    match result.unwrap_err() {
        LowerError::Lowering { msg, loc } => {
            assert!(msg.contains("one bit"));
            assert_eq!(loc.line, 4);
        }
        other => panic!("expected wrapped consistency failure, got {:?}", other),
    }
}

#[test]
fn return_of_optional_uses_the_optional_abi() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    ir.add_block(0).push(Instruction::Return {
        value: v("x"),
        loc: loc(1),
    });

    let declared = Type::Optional(Box::new(i64t()));
    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("x", i64t())]),
        declared.clone(),
        SignatureTable::new(),
    );
    result.unwrap();

    assert!(backend.events.contains(&Event::ReturnOptional {
        declared,
        actual: i64t(),
    }));
    assert_eq!(backend.count(|e| matches!(e, Event::ReturnValue)), 0);
    assert_eq!(backend.count(|e| matches!(e, Event::OutgoingReturn(_))), 0);
}

#[test]
fn return_coerces_to_the_declared_type() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    ir.add_block(0).push(Instruction::Return {
        value: v("x"),
        loc: loc(1),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("x", Type::Int(32))]),
        i64t(),
        SignatureTable::new(),
    );
    result.unwrap();

    assert!(backend.events.contains(&Event::Cast {
        from: Type::Int(32),
        to: i64t(),
    }));
    assert!(backend.events.contains(&Event::OutgoingReturn(i64t())));
    assert_eq!(backend.count(|e| matches!(e, Event::ReturnValue)), 1);
}

fn setitem_ir() -> FunctionIr {
    let mut ir = FunctionIr::new(
        "f",
        Some("m".to_string()),
        vec!["t".to_string(), "i".to_string(), "x".to_string()],
    );
    let block = ir.add_block(0);
    block.push(Instruction::SetItem {
        target: v("t"),
        index: v("i"),
        value: v("x"),
        op_id: OpId(0),
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });
    ir
}

#[test]
fn setitem_unwraps_an_optional_target() {
    let optional = Type::Optional(Box::new(array_i64()));
    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(Type::NoneType, vec![array_i64(), i64t(), i64t()]),
    );

    let (backend, _, result) = lower_run(
        &setitem_ir(),
        typemap(&[("t", optional.clone()), ("i", i64t()), ("x", i64t())]),
        i64t(),
        sigs,
    );
    result.unwrap();

    assert!(backend.events.contains(&Event::GetFunction {
        key: "op:setitem".to_string(),
        sig: Signature::new(Type::NoneType, vec![array_i64(), i64t(), i64t()]),
    }));
    // The optional target is coerced to its wrapped inner type before the
    // call; index and value are coerced to the signature.
    assert!(backend.events.contains(&Event::Cast {
        from: optional,
        to: array_i64(),
    }));
    assert_eq!(backend.count(|e| matches!(e, Event::CallImpl { argc: 3, .. })), 1);
}

#[test]
fn setitem_requires_an_exact_target_type_otherwise() {
    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(
            Type::NoneType,
            vec![
                Type::Array {
                    element: Box::new(Type::Float(64)),
                    ndim: 1,
                },
                i64t(),
                i64t(),
            ],
        ),
    );

    let (_, _, result) = lower_run(
        &setitem_ir(),
        typemap(&[("t", array_i64()), ("i", i64t()), ("x", i64t())]),
        i64t(),
        sigs,
    );
    match result.unwrap_err() {
        LowerError::Lowering { msg, .. } => assert!(msg.contains("setitem target type")),
        other => panic!("expected wrapped consistency failure, got {:?}", other),
    }
}

#[test]
fn setattr_checks_the_target_and_coerces_the_value() {
    let mut ir = FunctionIr::new(
        "f",
        Some("m".to_string()),
        vec!["t".to_string(), "x".to_string()],
    );
    let block = ir.add_block(0);
    block.push(Instruction::SetAttr {
        target: v("t"),
        attr: "count".to_string(),
        value: v("x"),
        op_id: OpId(0),
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });

    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(Type::NoneType, vec![Type::Opaque, i64t()]),
    );

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("t", Type::Opaque), ("x", Type::Int(32))]),
        Type::Int(32),
        sigs,
    );
    result.unwrap();

    assert!(backend
        .events
        .contains(&Event::GetSetattr("count".to_string())));
    assert!(backend.events.contains(&Event::Cast {
        from: Type::Int(32),
        to: i64t(),
    }));
    assert_eq!(backend.count(|e| matches!(e, Event::CallImpl { argc: 2, .. })), 1);
}

#[test]
fn setattr_has_no_optional_unwrap_path() {
    let mut ir = FunctionIr::new(
        "f",
        Some("m".to_string()),
        vec!["t".to_string(), "x".to_string()],
    );
    let block = ir.add_block(0);
    block.push(Instruction::SetAttr {
        target: v("t"),
        attr: "count".to_string(),
        value: v("x"),
        op_id: OpId(0),
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });

    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(Type::NoneType, vec![Type::Opaque, i64t()]),
    );

    let (_, _, result) = lower_run(
        &ir,
        typemap(&[
            ("t", Type::Optional(Box::new(Type::Opaque))),
            ("x", i64t()),
        ]),
        i64t(),
        sigs,
    );
    match result.unwrap_err() {
        LowerError::Lowering { msg, .. } => assert!(msg.contains("setattr target type")),
        other => panic!("expected wrapped consistency failure, got {:?}", other),
    }
}

#[test]
fn raise_without_operand_reraises() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec![]);
    ir.add_block(0).push(Instruction::Raise {
        exception: None,
        loc: loc(1),
    });

    let (backend, _, result) = lower_run(&ir, typemap(&[]), Type::NoneType, SignatureTable::new());
    result.unwrap();
    assert!(backend.events.contains(&Event::ReturnException {
        class: None,
        args: None,
    }));
}

#[test]
fn raise_instance_folds_constructor_arguments() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec![]);
    let block = ir.add_block(0);
    block.push(Instruction::Assign {
        target: v("cls"),
        value: RhsValue::Global {
            name: "ValueError".to_string(),
            value: None,
        },
        loc: loc(1),
    });
    block.push(Instruction::Assign {
        target: v("msg"),
        value: RhsValue::Const {
            value: Const::Str("bad value".to_string()),
        },
        loc: loc(1),
    });
    block.push(Instruction::Assign {
        target: v("e"),
        value: RhsValue::Expr(Expr::Call {
            callee: Callee::Var(v("cls")),
            args: vec![v("msg")],
            kws: vec![],
            op_id: OpId(0),
        }),
        loc: loc(2),
    });
    block.push(Instruction::Raise {
        exception: Some(v("e")),
        loc: loc(3),
    });

    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(
            Type::ExceptionInstance(ExcClass::ValueError),
            vec![Type::Opaque],
        ),
    );

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[
            ("cls", Type::ExceptionClass(ExcClass::ValueError)),
            ("msg", Type::Opaque),
            ("e", Type::ExceptionInstance(ExcClass::ValueError)),
        ]),
        Type::NoneType,
        sigs,
    );
    result.unwrap();

    assert!(backend.events.contains(&Event::ReturnException {
        class: Some(ExcClass::ValueError),
        args: Some(vec![Const::Str("bad value".to_string())]),
    }));
}

#[test]
fn raise_instance_with_non_constant_argument_is_forbidden() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    let block = ir.add_block(0);
    block.push(Instruction::Assign {
        target: v("cls"),
        value: RhsValue::Global {
            name: "ValueError".to_string(),
            value: None,
        },
        loc: loc(1),
    });
    block.push(Instruction::Assign {
        target: v("e"),
        value: RhsValue::Expr(Expr::Call {
            callee: Callee::Var(v("cls")),
            args: vec![v("x")],
            kws: vec![],
            op_id: OpId(0),
        }),
        loc: loc(2),
    });
    block.push(Instruction::Raise {
        exception: Some(v("e")),
        loc: loc(9),
    });

    let mut sigs = SignatureTable::new();
    sigs.insert(
        OpId(0),
        Signature::new(
            Type::ExceptionInstance(ExcClass::ValueError),
            vec![i64t()],
        ),
    );

    let (_, _, result) = lower_run(
        &ir,
        typemap(&[
            ("cls", Type::ExceptionClass(ExcClass::ValueError)),
            ("x", i64t()),
            ("e", Type::ExceptionInstance(ExcClass::ValueError)),
        ]),
        Type::NoneType,
        sigs,
    );
    match result.unwrap_err() {
        LowerError::ForbiddenConstruct { msg, loc } => {
            assert!(msg.contains("not a compile-time constant"));
            assert_eq!(loc.line, 9);
        }
        other => panic!("expected forbidden construct, got {:?}", other),
    }
}

#[test]
fn raise_instance_not_built_by_a_plain_call_is_forbidden() {
    // The construction site is a keyword call; placed in a later block so
    // the raise is reached first.
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    ir.add_block(0).push(Instruction::Raise {
        exception: Some(v("e")),
        loc: loc(5),
    });
    ir.add_block(10).push(Instruction::Assign {
        target: v("e"),
        value: RhsValue::Expr(Expr::Call {
            callee: Callee::Var(v("cls")),
            args: vec![],
            kws: vec![("message".to_string(), v("x"))],
            op_id: OpId(0),
        }),
        loc: loc(6),
    });

    let (_, _, result) = lower_run(
        &ir,
        typemap(&[
            ("cls", Type::ExceptionClass(ExcClass::ValueError)),
            ("x", i64t()),
            ("e", Type::ExceptionInstance(ExcClass::ValueError)),
        ]),
        Type::NoneType,
        SignatureTable::new(),
    );
    match result.unwrap_err() {
        LowerError::ForbiddenConstruct { msg, loc } => {
            assert!(msg.contains("unsupported kind of raising"));
            assert_eq!(loc.line, 5);
        }
        other => panic!("expected forbidden construct, got {:?}", other),
    }
}

#[test]
fn raise_of_exception_type_passes_no_arguments() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["cls".to_string()]);
    ir.add_block(0).push(Instruction::Raise {
        exception: Some(v("cls")),
        loc: loc(1),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("cls", Type::ExceptionClass(ExcClass::TypeError))]),
        Type::NoneType,
        SignatureTable::new(),
    );
    result.unwrap();
    assert!(backend.events.contains(&Event::ReturnException {
        class: Some(ExcClass::TypeError),
        args: None,
    }));
}

#[test]
fn raise_of_a_non_exception_value_is_forbidden() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    ir.add_block(0).push(Instruction::Raise {
        exception: Some(v("x")),
        loc: loc(1),
    });

    let (_, _, result) = lower_run(
        &ir,
        typemap(&[("x", i64t())]),
        Type::NoneType,
        SignatureTable::new(),
    );
    match result.unwrap_err() {
        LowerError::ForbiddenConstruct { msg, .. } => {
            assert!(msg.contains("cannot raise value of type int64"))
        }
        other => panic!("expected forbidden construct, got {:?}", other),
    }
}

#[test]
fn del_is_a_no_op() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    let block = ir.add_block(0);
    block.push(Instruction::Del {
        name: "x".to_string(),
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
    );
    result.unwrap();
    // Nothing beyond argument setup and the return sequence.
    assert_eq!(backend.count(|e| matches!(e, Event::CallImpl { .. })), 0);
}

#[test]
fn assign_of_module_typed_global_yields_the_dummy_value() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    let block = ir.add_block(0);
    block.push(Instruction::Assign {
        target: v("np"),
        value: RhsValue::Global {
            name: "numlib".to_string(),
            value: None,
        },
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[
            ("x", i64t()),
            ("np", Type::Module("numlib".to_string())),
        ]),
        i64t(),
        SignatureTable::new(),
    );
    result.unwrap();
    assert_eq!(backend.count(|e| matches!(e, Event::DummyValue)), 1);
}

#[test]
fn assign_of_array_constant_uses_the_array_constructor() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    let block = ir.add_block(0);
    block.push(Instruction::Assign {
        target: v("a"),
        value: RhsValue::Global {
            name: "TABLE".to_string(),
            value: Some(Const::Tuple(vec![Const::int(1), Const::int(2)])),
        },
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("x"),
        loc: loc(2),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("x", i64t()), ("a", array_i64())]),
        i64t(),
        SignatureTable::new(),
    );
    result.unwrap();
    assert!(backend.events.contains(&Event::ConstArray(array_i64())));
    assert_eq!(backend.count(|e| matches!(e, Event::ConstGeneric { .. })), 0);
}

#[test]
fn assign_var_to_var_coerces_between_declared_types() {
    let mut ir = FunctionIr::new("f", Some("m".to_string()), vec!["x".to_string()]);
    let block = ir.add_block(0);
    block.push(Instruction::Assign {
        target: v("y"),
        value: RhsValue::Var(v("x")),
        loc: loc(1),
    });
    block.push(Instruction::Return {
        value: v("y"),
        loc: loc(2),
    });

    let (backend, _, result) = lower_run(
        &ir,
        typemap(&[("x", Type::Int(32)), ("y", i64t())]),
        i64t(),
        SignatureTable::new(),
    );
    result.unwrap();
    assert!(backend.events.contains(&Event::Cast {
        from: Type::Int(32),
        to: i64t(),
    }));
}
