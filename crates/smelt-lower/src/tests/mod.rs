
mod descriptor_tests;
mod inst_tests;

use crate::context::Lower;
use crate::descriptor::FunctionDescriptor;
use crate::errors::Result;
use crate::module_env::{Module, ModuleRegistry};
use mock::{MockBackend, MockCallConv, MockLibrary};
use smelt_ir::{FunctionIr, Loc, SignatureTable, Type, TypeMap, Var};
use std::collections::HashMap;

pub(crate) fn loc(line: u32) -> Loc {
    Loc::new(line, 0)
}

pub(crate) fn v(name: &str) -> Var {
    Var::new(name, loc(1))
}

pub(crate) fn i64t() -> Type {
    Type::Int(64)
}

pub(crate) fn typemap(entries: &[(&str, Type)]) -> TypeMap {
    let mut map = TypeMap::new();
    for (name, ty) in entries {
        map.insert(*name, ty.clone());
    }
    map
}

pub(crate) fn registry_for(ir: &FunctionIr) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    if let Some(module) = &ir.module {
        registry.register(Module::new(module.clone(), HashMap::new()));
    }
    registry
}

/// Build a native descriptor for `ir`, lower it against a fresh mock
/// backend, and hand back the recording for assertions.
pub(crate) fn lower_run(
    ir: &FunctionIr,
    tm: TypeMap,
    restype: Type,
    sigs: SignatureTable,
) -> (MockBackend, MockLibrary, Result<()>) {
    lower_run_with(MockBackend::new(), ir, tm, restype, sigs)
}

pub(crate) fn lower_run_with(
    mut backend: MockBackend,
    ir: &FunctionIr,
    tm: TypeMap,
    restype: Type,
    sigs: SignatureTable,
) -> (MockBackend, MockLibrary, Result<()>) {
    let desc = FunctionDescriptor::from_function_ir(ir, tm, restype, sigs, None, false)
        .expect("descriptor");
    let registry = registry_for(ir);
    let mut library = MockLibrary::default();
    let result = {
        let mut lower = Lower::new(&mut backend, MockCallConv, &mut library, &registry, &desc, ir)
            .expect("lowering context");
        lower.run()
    };
    (backend, library, result)
}
