use crate::errors::{LowerError, Result};
use crate::module_env::{Module, ModuleRegistry, DYNAMIC_MODULE};
use smelt_ir::{FunctionIr, SignatureTable, Type, TypeMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces the backend linkage name for a (name, argument types) pair.
pub type Mangler = fn(&str, &[Type]) -> String;

/// Joins the name with the normalized string forms of the argument types.
/// Spaces inside type spellings are replaced so the result is a single
/// symbol-safe token.
pub fn default_mangler(name: &str, argtypes: &[Type]) -> String {
    let coded = argtypes
        .iter()
        .map(|ty| ty.to_string().replace(' ', "_"))
        .collect::<Vec<_>>()
        .join(".");
    format!("{}.{}", name, coded)
}

fn identity_mangler(name: &str, _argtypes: &[Type]) -> String {
    name.to_string()
}

// The same source function can be compiled into several distinct function
// objects (e.g. with different frozen closures), so every descriptor gets a
// process-unique disambiguating suffix.
static UNIQUE_IDS: AtomicU64 = AtomicU64::new(1);

fn next_unique_id() -> u64 {
    UNIQUE_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Immutable identity and typing contract of one function instance under
/// compilation.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// Native (statically typed) target, or the dynamically-typed fallback
    /// execution path.
    pub native: bool,
    /// Owning module name; `None` only for external symbol descriptors.
    pub modname: Option<String>,
    pub qualname: String,
    /// Process-unique disambiguated name; also names the backend unit.
    pub unique_name: String,
    pub doc: String,
    pub typemap: TypeMap,
    pub calltypes: SignatureTable,
    /// Ordered parameter names.
    pub args: Vec<String>,
    /// Declared keyword parameters. Carried but currently always empty.
    pub kws: Vec<String>,
    pub restype: Type,
    pub argtypes: Vec<Type>,
    pub mangled_name: String,
    pub inline: bool,
}

impl FunctionDescriptor {
    #[allow(clippy::too_many_arguments)]
    fn new(
        native: bool,
        modname: Option<String>,
        qualname: String,
        unique_name: String,
        doc: String,
        typemap: TypeMap,
        restype: Type,
        calltypes: SignatureTable,
        args: Vec<String>,
        argtypes: Vec<Type>,
        mangler: Option<Mangler>,
        inline: bool,
    ) -> Self {
        let mangler = mangler.unwrap_or(default_mangler);
        // The mangled name must be unique per (name, argument types), else
        // the backend can pick the wrong function at link time.
        let mangled_name = match &modname {
            Some(modname) => mangler(&format!("{}.{}", modname, unique_name), &argtypes),
            None => mangler(&unique_name, &argtypes),
        };
        Self {
            native,
            modname,
            qualname,
            unique_name,
            doc,
            typemap,
            calltypes,
            args,
            kws: Vec::new(),
            restype,
            argtypes,
            mangled_name,
            inline,
        }
    }

    /// Descriptor for a natively compiled function, with typing results from
    /// inference.
    pub fn from_function_ir(
        func_ir: &FunctionIr,
        typemap: TypeMap,
        restype: Type,
        calltypes: SignatureTable,
        mangler: Option<Mangler>,
        inline: bool,
    ) -> Result<Self> {
        Self::from_ir(func_ir, typemap, restype, calltypes, true, mangler, inline)
    }

    /// Descriptor for the dynamically-typed fallback path: every variable is
    /// typed as the opaque object type, including names never seen.
    pub fn fallback(func_ir: &FunctionIr) -> Result<Self> {
        Self::from_ir(
            func_ir,
            TypeMap::with_default(Type::Opaque),
            Type::Opaque,
            SignatureTable::new(),
            false,
            None,
            false,
        )
    }

    fn from_ir(
        func_ir: &FunctionIr,
        typemap: TypeMap,
        restype: Type,
        calltypes: SignatureTable,
        native: bool,
        mangler: Option<Mangler>,
        inline: bool,
    ) -> Result<Self> {
        let qualname = func_ir.qualname.clone();
        // Functions with no resolvable module live in the dynamic-module
        // sentinel so lookups never fail.
        let modname = func_ir
            .module
            .clone()
            .unwrap_or_else(|| DYNAMIC_MODULE.to_string());
        let unique_name = format!("{}${}", qualname, next_unique_id());
        let argtypes = func_ir
            .params
            .iter()
            .map(|name| {
                typemap.get(name).cloned().ok_or_else(|| {
                    LowerError::Consistency(format!("no type recorded for parameter '{}'", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            native,
            Some(modname),
            qualname,
            unique_name,
            func_ir.doc.clone(),
            typemap,
            restype,
            calltypes,
            func_ir.params.clone(),
            argtypes,
            mangler,
            inline,
        ))
    }

    /// Descriptor for an opaque external function with a fixed symbol;
    /// parameter names are synthesized and the symbol is used unmangled.
    pub fn external(symbol: &str, restype: Type, argtypes: Vec<Type>) -> Self {
        let args = (0..argtypes.len()).map(|i| format!("arg{}", i)).collect();
        Self::new(
            true,
            None,
            symbol.to_string(),
            symbol.to_string(),
            String::new(),
            TypeMap::new(),
            restype,
            SignatureTable::new(),
            args,
            argtypes,
            Some(identity_mangler),
            false,
        )
    }

    /// The module this function is supposed to exist in; the dynamic-module
    /// sentinel when the function was dynamically generated.
    pub fn resolve_module<'a>(&self, registry: &'a ModuleRegistry) -> Result<&'a Module> {
        registry.resolve(self.modname.as_deref())
    }

    /// Backend linkage name of the compiled function body.
    pub fn symbol_name(&self) -> &str {
        &self.mangled_name
    }

    /// Symbol under which the host-interop wrapper is declared.
    pub fn host_wrapper_symbol(&self) -> String {
        format!("wrapper.{}", self.mangled_name)
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function descriptor '{}'>", self.unique_name)
    }
}
