use super::{i64t, loc, typemap, v};
use crate::descriptor::{default_mangler, FunctionDescriptor};
use crate::module_env::{dynamic_module, ModuleRegistry};
use pretty_assertions::assert_eq;
use smelt_ir::{FunctionIr, Instruction, SignatureTable, Type, TypeMap};

fn simple_ir() -> FunctionIr {
    let mut ir = FunctionIr::new("pkg.f", Some("pkg".to_string()), vec!["x".to_string()]);
    ir.add_block(0).push(Instruction::Return {
        value: v("x"),
        loc: loc(1),
    });
    ir
}

#[test]
fn default_mangler_normalizes_spaces() {
    let tuple = Type::Tuple(vec![i64t(), Type::Float(64)]);
    let mangled = default_mangler("pkg.f", &[tuple, i64t()]);
    assert_eq!(mangled, "pkg.f.(int64,_float64).int64");
}

#[test]
fn mangled_names_are_unique_per_argument_types() {
    let ir = simple_ir();
    let a = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    let b = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", Type::Float(64))]),
        Type::Float(64),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    assert_ne!(a.mangled_name, b.mangled_name);
    assert!(a.mangled_name.ends_with(".int64"));
    assert!(b.mangled_name.ends_with(".float64"));
}

#[test]
fn unique_names_disambiguate_repeated_compilations() {
    let ir = simple_ir();
    let a = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    let b = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    assert_eq!(a.qualname, b.qualname);
    assert_ne!(a.unique_name, b.unique_name);
    assert_ne!(a.mangled_name, b.mangled_name);
}

#[test]
fn fallback_descriptor_differs_only_in_mode_and_typing() {
    let ir = simple_ir();
    let native = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    let fallback = FunctionDescriptor::fallback(&ir).unwrap();

    assert!(native.native);
    assert!(!fallback.native);
    assert_eq!(native.qualname, fallback.qualname);
    assert_eq!(native.args, fallback.args);

    // The fallback type map answers the opaque type for any name at all.
    assert_eq!(fallback.typemap.get("x"), Some(&Type::Opaque));
    assert_eq!(fallback.typemap.get("never_seen"), Some(&Type::Opaque));
    assert_eq!(fallback.restype, Type::Opaque);
    assert_eq!(fallback.argtypes, vec![Type::Opaque]);

    // Both mangled names are symbol-safe.
    assert!(!native.mangled_name.contains(' '));
    assert!(!fallback.mangled_name.contains(' '));
    assert!(fallback.mangled_name.starts_with("pkg."));
}

#[test]
fn external_descriptor_keeps_its_symbol_unmangled() {
    let desc = FunctionDescriptor::external("cos", Type::Float(64), vec![Type::Float(64)]);
    assert!(desc.native);
    assert_eq!(desc.modname, None);
    assert_eq!(desc.args, vec!["arg0".to_string()]);
    assert_eq!(desc.mangled_name, "cos");
    assert_eq!(desc.symbol_name(), "cos");
    assert_eq!(desc.argtypes, vec![Type::Float(64)]);
}

#[test]
fn wrapper_symbol_derives_from_the_mangled_name() {
    let ir = simple_ir();
    let desc = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap();
    assert_eq!(
        desc.host_wrapper_symbol(),
        format!("wrapper.{}", desc.mangled_name)
    );
}

#[test]
fn custom_manglers_are_honored() {
    fn shouty(name: &str, argtypes: &[Type]) -> String {
        format!("{}__{}", name.to_uppercase(), argtypes.len())
    }
    let ir = simple_ir();
    let desc = FunctionDescriptor::from_function_ir(
        &ir,
        typemap(&[("x", i64t())]),
        i64t(),
        SignatureTable::new(),
        Some(shouty),
        false,
    )
    .unwrap();
    assert!(desc.mangled_name.starts_with("PKG."));
    assert!(desc.mangled_name.ends_with("__1"));
}

#[test]
fn missing_parameter_type_is_a_consistency_failure() {
    let ir = simple_ir();
    let err = FunctionDescriptor::from_function_ir(
        &ir,
        TypeMap::new(),
        i64t(),
        SignatureTable::new(),
        None,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, crate::errors::LowerError::Consistency(_)));
}

#[test]
fn module_resolution_falls_back_to_the_sentinel() {
    let mut ir = simple_ir();
    ir.module = None;
    let desc = FunctionDescriptor::fallback(&ir).unwrap();
    let registry = ModuleRegistry::new();
    let module = desc.resolve_module(&registry).unwrap();
    assert_eq!(module.name, dynamic_module().name);
    assert!(module.globals().is_empty());
}
