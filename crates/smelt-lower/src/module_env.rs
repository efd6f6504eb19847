use crate::errors::{LowerError, Result};
use smelt_ir::Const;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Name of the sentinel module assigned to dynamically generated functions,
/// so owning-module lookups never fail.
pub const DYNAMIC_MODULE: &str = "<dynamic>";

/// A runtime module record: the dictionary that supplies global variable
/// bindings to compiled functions at call time.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    globals: Arc<HashMap<String, Const>>,
}

impl Module {
    pub fn new(name: impl Into<String>, globals: HashMap<String, Const>) -> Self {
        Self {
            name: name.into(),
            globals: Arc::new(globals),
        }
    }

    pub fn globals(&self) -> &HashMap<String, Const> {
        &self.globals
    }
}

static DYNAMIC: OnceLock<Module> = OnceLock::new();

/// The process-wide dynamic-module sentinel. Initialized once, never mutated.
pub fn dynamic_module() -> &'static Module {
    DYNAMIC.get_or_init(|| Module::new(DYNAMIC_MODULE, HashMap::new()))
}

/// Runtime module table, injected wherever owning-module resolution is
/// needed.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// The module `name` resolves to, falling back to the dynamic-module
    /// sentinel for the sentinel name itself. Unregistered real modules are
    /// an internal-consistency failure.
    pub fn resolve<'a>(&'a self, name: Option<&str>) -> Result<&'a Module> {
        match name {
            None | Some(DYNAMIC_MODULE) => Ok(dynamic_module()),
            Some(other) => self.get(other).ok_or_else(|| {
                LowerError::Consistency(format!("module '{}' is not registered", other))
            }),
        }
    }
}

/// Execution environment handed to the compiled function: the owning
/// module's global bindings. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct Environment {
    globals: Arc<HashMap<String, Const>>,
}

impl Environment {
    pub fn new(module: &Module) -> Self {
        Self {
            globals: module.globals.clone(),
        }
    }

    pub fn globals(&self) -> &HashMap<String, Const> {
        &self.globals
    }
}
