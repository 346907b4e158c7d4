//! Import and delay-import descriptors.

/// How a function is requested from its module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedFunction {
    /// Import by exported name
    ByName {
        /// Export table hint
        hint: u16,
        /// Exported name
        name: String,
    },
    /// Import by export ordinal
    ByOrdinal(u16),
}

impl ImportedFunction {
    /// Import by name with a zero hint
    pub fn named(name: &str) -> Self {
        Self::ByName {
            hint: 0,
            name: name.into(),
        }
    }
}

/// Eagerly bound dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// Module name as written in the image
    pub module: String,
    /// Requested functions, in thunk order
    pub functions: Vec<ImportedFunction>,
    /// RVA of the address table written by the binder
    pub thunk_rva: u32,
}

impl ImportDescriptor {
    /// Create a descriptor with no functions yet
    pub fn new(module: &str, thunk_rva: u32) -> Self {
        Self {
            module: module.into(),
            functions: Vec::new(),
            thunk_rva,
        }
    }

    /// Append a function, builder style
    pub fn with_function(mut self, function: ImportedFunction) -> Self {
        self.functions.push(function);
        self
    }
}

/// Delay-load dependency
///
/// Bound eagerly by the loader; the module handle slot is filled as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayImportDescriptor {
    /// Module name as written in the image
    pub module: String,
    /// Requested functions, in thunk order
    pub functions: Vec<ImportedFunction>,
    /// RVA of the delay address table
    pub thunk_rva: u32,
    /// RVA of the module handle slot
    pub module_handle_rva: u32,
}

impl DelayImportDescriptor {
    /// Create a descriptor with no functions yet
    pub fn new(module: &str, thunk_rva: u32, module_handle_rva: u32) -> Self {
        Self {
            module: module.into(),
            functions: Vec::new(),
            thunk_rva,
            module_handle_rva,
        }
    }

    /// Append a function, builder style
    pub fn with_function(mut self, function: ImportedFunction) -> Self {
        self.functions.push(function);
        self
    }
}
