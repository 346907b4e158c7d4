//! # Simulated Host
//!
//! A host that never touches real process state. Reservations are heap
//! buffers placed at made-up addresses, modules are tables of stub exports,
//! and every protection change, unwind registration and bookkeeping write
//! is recorded for inspection. Used by the test suite and by dry runs.

use pefrm_image::{Machine, RuntimeFunction};

use super::{
    Host, LoaderBookkeeping, MemoryManager, ModuleHandle, ModuleResolver, Protection, SymbolRef,
    UnwindRegistry,
};
use crate::context::ImageRegion;
use crate::error::{LoadError, LoadResult};

/// Default address of the first simulated reservation
pub const DEFAULT_RESERVATION_BASE: u64 = 0x0000_0200_0000_0000;

/// Gap between consecutive synthetic modules and reservations
const ADDRESS_STRIDE: u64 = 0x0100_0000;

/// A stub dependency with a fixed export table
#[derive(Debug, Clone)]
pub struct SimulatedModule {
    name: String,
    base: u64,
    exports: Vec<(String, u64)>,
    ordinals: Vec<(u16, u64)>,
}

impl SimulatedModule {
    /// Create a module with no exports
    pub fn new(name: &str, base: u64) -> Self {
        Self {
            name: name.into(),
            base,
            exports: Vec::new(),
            ordinals: Vec::new(),
        }
    }

    /// Add a named export
    pub fn export(mut self, name: &str, address: u64) -> Self {
        self.exports.push((name.into(), address));
        self
    }

    /// Add an ordinal export
    pub fn ordinal(mut self, ordinal: u16, address: u64) -> Self {
        self.ordinals.push((ordinal, address));
        self
    }

    fn lookup(&self, symbol: SymbolRef<'_>) -> Option<u64> {
        match symbol {
            SymbolRef::Name(name) => self.exports.iter().find(|(n, _)| n == name).map(|(_, a)| *a),
            SymbolRef::Ordinal(ordinal) => self
                .ordinals
                .iter()
                .find(|(o, _)| *o == ordinal)
                .map(|(_, a)| *a),
        }
    }
}

/// One recorded protection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionRecord {
    /// First RVA
    pub rva: u32,
    /// Length in bytes
    pub len: usize,
    /// New protection
    pub protection: Protection,
}

/// Host backed entirely by in-memory tables
#[derive(Debug)]
pub struct SimulatedHost {
    machine: Machine,
    next_base: u64,
    fill: u8,
    refuse_reservation: bool,
    refuse_unwind: bool,
    permissive: bool,
    modules: Vec<SimulatedModule>,
    /// Modules requested, in order
    pub loaded_modules: Vec<String>,
    /// Protection changes, in order
    pub protections: Vec<ProtectionRecord>,
    /// Unwind tables registered, with their base
    pub unwind_tables: Vec<(u64, Vec<RuntimeFunction>)>,
    /// Simulated process image-base record
    pub image_base_record: u64,
    /// Simulated head module-list entry base
    pub head_module_record: u64,
}

impl SimulatedHost {
    /// Host for `machine` with no modules
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            next_base: DEFAULT_RESERVATION_BASE,
            fill: 0,
            refuse_reservation: false,
            refuse_unwind: false,
            permissive: false,
            modules: Vec::new(),
            loaded_modules: Vec::new(),
            protections: Vec::new(),
            unwind_tables: Vec::new(),
            image_base_record: 0x0000_7FF7_0000_0000,
            head_module_record: 0x0000_7FF7_0000_0000,
        }
    }

    /// Host that resolves any module and symbol to a synthetic address.
    ///
    /// Used for dry runs where the real dependencies are not consulted.
    pub fn permissive(machine: Machine) -> Self {
        Self {
            permissive: true,
            ..Self::new(machine)
        }
    }

    /// Place the next reservation at `base`
    pub fn with_reservation_base(mut self, base: u64) -> Self {
        self.next_base = base;
        self
    }

    /// Fill fresh reservations with `byte` instead of zero
    pub fn with_fill(mut self, byte: u8) -> Self {
        self.fill = byte;
        self
    }

    /// Make every reservation fail
    pub fn refusing_reservations(mut self) -> Self {
        self.refuse_reservation = true;
        self
    }

    /// Make every unwind registration fail
    pub fn refusing_unwind(mut self) -> Self {
        self.refuse_unwind = true;
        self
    }

    /// Add a stub module
    pub fn with_module(mut self, module: SimulatedModule) -> Self {
        self.modules.push(module);
        self
    }

    fn module_by_handle(&self, handle: ModuleHandle) -> Option<&SimulatedModule> {
        self.modules.iter().find(|m| m.base == handle.0)
    }

    fn synthesize_module(&mut self, name: &str) -> ModuleHandle {
        let base = DEFAULT_RESERVATION_BASE / 2 + ADDRESS_STRIDE * self.modules.len() as u64;
        self.modules.push(SimulatedModule::new(name, base));
        ModuleHandle(base)
    }
}

impl MemoryManager for SimulatedHost {
    fn reserve(&mut self, size: usize) -> LoadResult<ImageRegion> {
        if self.refuse_reservation || size == 0 {
            return Err(LoadError::ReservationFailure { size });
        }
        let region = ImageRegion::owned(self.next_base, size, self.fill);
        let span = (size as u64).div_ceil(ADDRESS_STRIDE).max(1) * ADDRESS_STRIDE;
        self.next_base = self.next_base.wrapping_add(span);
        Ok(region)
    }

    fn protect(&mut self, region: &ImageRegion, rva: u32, len: usize, protection: Protection) -> LoadResult<()> {
        // The region enforces the bounds a real VirtualProtect would fault on.
        region
            .slice(rva, len)
            .map_err(|_| LoadError::ProtectionFailure { rva, len })?;
        self.protections.push(ProtectionRecord { rva, len, protection });
        Ok(())
    }
}

impl ModuleResolver for SimulatedHost {
    fn load_module(&mut self, name: &str) -> Option<ModuleHandle> {
        self.loaded_modules.push(name.into());
        let found = self
            .modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .map(|m| ModuleHandle(m.base));
        match found {
            Some(handle) => Some(handle),
            None if self.permissive => Some(self.synthesize_module(name)),
            None => None,
        }
    }

    fn resolve_symbol(&mut self, module: ModuleHandle, symbol: SymbolRef<'_>) -> Option<u64> {
        let resolved = self.module_by_handle(module)?.lookup(symbol);
        if resolved.is_some() || !self.permissive {
            return resolved;
        }
        // Deterministic stand-in: module base plus a hash of the symbol.
        let salt = match symbol {
            SymbolRef::Name(name) => name
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b))),
            SymbolRef::Ordinal(ordinal) => u64::from(ordinal),
        };
        Some(module.0 + 0x1000 + (salt % (ADDRESS_STRIDE - 0x1000)))
    }
}

impl UnwindRegistry for SimulatedHost {
    fn register(&mut self, table: &[RuntimeFunction], base: u64) -> bool {
        if self.refuse_unwind {
            return false;
        }
        self.unwind_tables.push((base, table.to_vec()));
        true
    }
}

impl LoaderBookkeeping for SimulatedHost {
    fn image_base(&self) -> u64 {
        self.image_base_record
    }

    fn set_image_base(&mut self, base: u64) {
        self.image_base_record = base;
    }

    fn head_module_base(&self) -> u64 {
        self.head_module_record
    }

    fn set_head_module_base(&mut self, base: u64) {
        self.head_module_record = base;
    }
}

impl Host for SimulatedHost {
    fn host_arch(&self) -> Machine {
        self.machine
    }
}
