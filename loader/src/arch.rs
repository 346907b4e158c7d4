//! # Architecture Profiles
//!
//! Everything that differs between 32-bit and 64-bit loads is captured once
//! in an [`ArchProfile`]: pointer width for thunk slots, the relocation kinds
//! that are legal, and whether the image carries a table-based unwind
//! directory. The validator picks the profile; later steps only consult it.

use core::fmt;

use pefrm_image::Machine;

use crate::relocation::RelocationKind;

// ============================================================================
// HOST MACHINE
// ============================================================================

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Machine the loader was compiled for
        pub const HOST_MACHINE: Machine = Machine::Amd64;
    } else if #[cfg(target_arch = "x86")] {
        /// Machine the loader was compiled for
        pub const HOST_MACHINE: Machine = Machine::I386;
    } else if #[cfg(target_arch = "aarch64")] {
        /// Machine the loader was compiled for
        pub const HOST_MACHINE: Machine = Machine::Arm64;
    } else {
        /// Machine the loader was compiled for
        pub const HOST_MACHINE: Machine = Machine::Unknown(0);
    }
}

// ============================================================================
// PROFILES
// ============================================================================

/// Width of an address slot in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    /// 4-byte slots
    Bits32,
    /// 8-byte slots
    Bits64,
}

impl PointerWidth {
    /// Slot size in bytes
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

/// Per-architecture loading rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchProfile {
    /// Machine this profile applies to
    pub machine: Machine,
    /// Thunk / handle slot width
    pub pointer_width: PointerWidth,
    /// Relocation kinds the processor accepts
    pub relocation_kinds: &'static [RelocationKind],
    /// Whether an exception directory must be registered
    pub unwind_table: bool,
}

impl ArchProfile {
    /// 32-bit x86
    pub const X86: Self = Self {
        machine: Machine::I386,
        pointer_width: PointerWidth::Bits32,
        relocation_kinds: &[RelocationKind::Absolute, RelocationKind::HighLow],
        unwind_table: false,
    };

    /// x86-64
    pub const X64: Self = Self {
        machine: Machine::Amd64,
        pointer_width: PointerWidth::Bits64,
        relocation_kinds: &[
            RelocationKind::Absolute,
            RelocationKind::HighLow,
            RelocationKind::Dir64,
        ],
        unwind_table: true,
    };

    /// Profile for a machine, if the loader supports it
    pub fn for_machine(machine: Machine) -> Option<Self> {
        match machine {
            Machine::I386 => Some(Self::X86),
            Machine::Amd64 => Some(Self::X64),
            _ => None,
        }
    }

    /// Returns `true` if the relocation kind may appear in this profile.
    pub fn supports(&self, kind: RelocationKind) -> bool {
        self.relocation_kinds.contains(&kind)
    }

    /// Same profile with every known relocation kind accepted
    pub fn with_all_relocation_kinds(mut self) -> Self {
        self.relocation_kinds = RelocationKind::ALL;
        self
    }
}

impl fmt::Display for ArchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-byte pointers, unwind table: {})",
            self.machine,
            self.pointer_width.bytes(),
            self.unwind_table
        )
    }
}
