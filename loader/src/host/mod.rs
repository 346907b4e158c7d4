//! # Host Capabilities
//!
//! The loader never calls the operating system directly. Each OS service it
//! needs is a trait here, and a [`Host`] bundles all of them:
//!
//! | Capability            | Used by                          |
//! |-----------------------|----------------------------------|
//! | [`MemoryManager`]     | reservation, section protection  |
//! | [`ModuleResolver`]    | import and delay-import binding  |
//! | [`UnwindRegistry`]    | exception directory registration |
//! | [`LoaderBookkeeping`] | loader metadata patching         |
//!
//! Two backends exist: [`simulated::SimulatedHost`] (heap memory, stub
//! modules, recorded calls) and, on Windows, `windows::WindowsHost`.

use core::fmt;

use bitflags::bitflags;
use pefrm_image::{ImportedFunction, Machine, RuntimeFunction, SectionFlags};

use crate::context::ImageRegion;
use crate::error::LoadResult;

pub mod simulated;
#[cfg(windows)]
pub mod windows;

// ============================================================================
// SHARED TYPES
// ============================================================================

bitflags! {
    /// Page protection requested from the memory manager
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        /// Pages may be read
        const READ = 1 << 0;
        /// Pages may be written
        const WRITE = 1 << 1;
        /// Pages may be executed
        const EXECUTE = 1 << 2;
        /// Everything, the state a fresh reservation is in
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Protection {
    /// Protection matching a section's requested access.
    ///
    /// Write access implies read access, as page protections cannot express
    /// write-only memory.
    pub fn for_section(flags: SectionFlags) -> Self {
        let mut protection = Self::empty();
        if flags.intersects(SectionFlags::READ | SectionFlags::WRITE) {
            protection |= Self::READ;
        }
        if flags.contains(SectionFlags::WRITE) {
            protection |= Self::WRITE;
        }
        if flags.contains(SectionFlags::EXECUTE) {
            protection |= Self::EXECUTE;
        }
        protection
    }
}

/// Opaque handle to a loaded dependency module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// Function requested from a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef<'a> {
    /// By exported name
    Name(&'a str),
    /// By export ordinal
    Ordinal(u16),
}

impl<'a> From<&'a ImportedFunction> for SymbolRef<'a> {
    fn from(function: &'a ImportedFunction) -> Self {
        match function {
            ImportedFunction::ByName { name, .. } => Self::Name(name),
            ImportedFunction::ByOrdinal(ordinal) => Self::Ordinal(*ordinal),
        }
    }
}

impl fmt::Display for SymbolRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Ordinal(ordinal) => write!(f, "#{}", ordinal),
        }
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Reserves and protects image memory
pub trait MemoryManager {
    /// Reserve and commit `size` bytes of read/write/execute memory.
    ///
    /// The returned region starts at RVA 0.
    fn reserve(&mut self, size: usize) -> LoadResult<ImageRegion>;

    /// Change the protection of `[rva, rva + len)` inside `region`
    fn protect(&mut self, region: &ImageRegion, rva: u32, len: usize, protection: Protection) -> LoadResult<()>;
}

/// Loads dependency modules and looks up their exports
pub trait ModuleResolver {
    /// Load (or find) a module by name
    fn load_module(&mut self, name: &str) -> Option<ModuleHandle>;

    /// Address of an export, if the module has it
    fn resolve_symbol(&mut self, module: ModuleHandle, symbol: SymbolRef<'_>) -> Option<u64>;
}

/// Registers exception unwind tables
pub trait UnwindRegistry {
    /// Register `table`, whose RVAs are relative to `base`.
    ///
    /// Returns `false` if the host refused the table.
    fn register(&mut self, table: &[RuntimeFunction], base: u64) -> bool;
}

/// Process-wide loader records describing the main image
pub trait LoaderBookkeeping {
    /// Current image-base record of the process
    fn image_base(&self) -> u64;

    /// Overwrite the image-base record
    fn set_image_base(&mut self, base: u64);

    /// Base recorded in the first module-list entry
    fn head_module_base(&self) -> u64;

    /// Overwrite the first module-list entry's base
    fn set_head_module_base(&mut self, base: u64);
}

/// Everything a load needs from its environment
pub trait Host: MemoryManager + ModuleResolver + UnwindRegistry + LoaderBookkeeping {
    /// Machine the host runs images for
    fn host_arch(&self) -> Machine;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_for_section() {
        let text = Protection::for_section(SectionFlags::READ | SectionFlags::EXECUTE);
        assert_eq!(text, Protection::READ | Protection::EXECUTE);

        let write_only = Protection::for_section(SectionFlags::WRITE);
        assert_eq!(write_only, Protection::READ | Protection::WRITE);

        assert_eq!(Protection::for_section(SectionFlags::empty()), Protection::empty());
        assert_eq!(
            Protection::for_section(SectionFlags::all()),
            Protection::RWX
        );
    }

    #[test]
    fn test_symbol_ref_from_import() {
        let by_name = ImportedFunction::named("GetTickCount");
        assert_eq!(SymbolRef::from(&by_name), SymbolRef::Name("GetTickCount"));

        let by_ordinal = ImportedFunction::ByOrdinal(17);
        assert_eq!(SymbolRef::from(&by_ordinal), SymbolRef::Ordinal(17));
        assert_eq!(format!("{}", SymbolRef::Ordinal(17)), "#17");
    }
}
