//! # PE Image Description
//!
//! Read-only model of a Windows PE32 / PE32+ executable, already decoded
//! into the pieces a manual loader needs: the declared base, entry point,
//! section payloads, base relocation blocks, the import and delay-import
//! tables and the x64 exception directory.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────┐     ┌────────────────────┐     ┌──────────────────┐
//! │  raw PE bytes    │────▶│ decode::decode()   │────▶│ ImageDescription │
//! │  (file content)  │     │ (object crate)     │     │ (this model)     │
//! └──────────────────┘     └────────────────────┘     └──────────────────┘
//! ```
//!
//! The loader never reads file offsets; everything in here is keyed by
//! relative virtual address (RVA).

#![warn(missing_docs)]

use core::fmt;

pub mod decode;
mod exception;
mod import;
mod reloc;
mod section;

pub use decode::decode;
pub use exception::RuntimeFunction;
pub use import::{DelayImportDescriptor, ImportDescriptor, ImportedFunction};
pub use reloc::{RelocationBlock, RelocationEntry};
pub use section::{Section, SectionFlags};

// ============================================================================
// ERRORS
// ============================================================================

/// Image decoding result type
pub type ImageResult<T> = Result<T, ImageError>;

/// Errors raised while turning raw bytes into an [`ImageDescription`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// The bytes are not a PE32 or PE32+ image
    NotPortableExecutable,
    /// A header or directory could not be read
    Malformed(object::read::Error),
    /// A section's file payload lies outside the file
    SectionOutOfFile {
        /// RVA of the offending section
        virtual_address: u32,
    },
    /// The exception directory size is not a whole number of entries
    BadExceptionDirectory {
        /// Directory size in bytes
        size: usize,
    },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPortableExecutable => write!(f, "Not a PE32/PE32+ image"),
            Self::Malformed(err) => write!(f, "Malformed PE image: {}", err),
            Self::SectionOutOfFile { virtual_address } => {
                write!(f, "Section at RVA {:#x} extends past end of file", virtual_address)
            },
            Self::BadExceptionDirectory { size } => {
                write!(f, "Exception directory size {} is not a multiple of 12", size)
            },
        }
    }
}

impl std::error::Error for ImageError {}

impl From<object::read::Error> for ImageError {
    fn from(err: object::read::Error) -> Self {
        Self::Malformed(err)
    }
}

// ============================================================================
// MACHINE / KIND
// ============================================================================

/// Target machine declared in the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Machine {
    /// 32-bit x86
    I386,
    /// x86-64
    Amd64,
    /// AArch64
    Arm64,
    /// Anything else, raw header value
    Unknown(u16),
}

impl Machine {
    /// Map a raw `IMAGE_FILE_MACHINE_*` value
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            object::pe::IMAGE_FILE_MACHINE_I386 => Self::I386,
            object::pe::IMAGE_FILE_MACHINE_AMD64 => Self::Amd64,
            object::pe::IMAGE_FILE_MACHINE_ARM64 => Self::Arm64,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I386 => write!(f, "x86"),
            Self::Amd64 => write!(f, "x64"),
            Self::Arm64 => write!(f, "arm64"),
            Self::Unknown(raw) => write!(f, "machine {:#06x}", raw),
        }
    }
}

/// Whether the image is a program or a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Runnable program
    Executable,
    /// Dynamic library (`IMAGE_FILE_DLL` set)
    Library,
}

// ============================================================================
// IMAGE DESCRIPTION
// ============================================================================

/// Everything the loader needs to know about one decoded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    /// Preferred (declared) load address
    pub image_base: u64,
    /// Entry point RVA
    pub entry_point: u32,
    /// Total mapped size in bytes
    pub image_size: u32,
    /// Target machine
    pub machine: Machine,
    /// Program or library
    pub kind: ImageKind,
    /// Whether the image may be loaded at another address
    pub dynamic_base: bool,
    /// Sections in header order
    pub sections: Vec<Section>,
    /// Base relocation blocks in directory order
    pub relocations: Vec<RelocationBlock>,
    /// Eagerly bound imports
    pub imports: Vec<ImportDescriptor>,
    /// Delay-load imports
    pub delay_imports: Vec<DelayImportDescriptor>,
    /// x64 exception directory entries
    pub exception_functions: Vec<RuntimeFunction>,
}

impl ImageDescription {
    /// Create an empty executable description
    pub fn new(machine: Machine, image_base: u64, image_size: u32) -> Self {
        Self {
            image_base,
            entry_point: 0,
            image_size,
            machine,
            kind: ImageKind::Executable,
            dynamic_base: false,
            sections: Vec::new(),
            relocations: Vec::new(),
            imports: Vec::new(),
            delay_imports: Vec::new(),
            exception_functions: Vec::new(),
        }
    }

    /// Returns `true` if the image carries at least one relocation entry.
    pub fn has_relocations(&self) -> bool {
        self.relocations.iter().any(|block| !block.entries.is_empty())
    }

    /// Total number of relocation entries across all blocks
    pub fn relocation_count(&self) -> usize {
        self.relocations.iter().map(|block| block.entries.len()).sum()
    }

    /// Lowest section RVA, if there are sections
    pub fn lowest_section_rva(&self) -> Option<u32> {
        self.sections.iter().map(|s| s.virtual_address).min()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_raw_values() {
        assert_eq!(Machine::from_raw(0x14c), Machine::I386);
        assert_eq!(Machine::from_raw(0x8664), Machine::Amd64);
        assert_eq!(Machine::from_raw(0xaa64), Machine::Arm64);
        assert_eq!(Machine::from_raw(0x1c0), Machine::Unknown(0x1c0));
    }

    #[test]
    fn test_relocation_presence() {
        let mut image = ImageDescription::new(Machine::Amd64, 0x1_4000_0000, 0x3000);
        assert!(!image.has_relocations());

        image.relocations.push(RelocationBlock::new(0x1000));
        assert!(!image.has_relocations());

        image.relocations[0].entries.push(RelocationEntry::new(0x10, RelocationEntry::DIR64));
        assert!(image.has_relocations());
        assert_eq!(image.relocation_count(), 1);
    }

    #[test]
    fn test_lowest_section() {
        let mut image = ImageDescription::new(Machine::I386, 0x40_0000, 0x4000);
        assert_eq!(image.lowest_section_rva(), None);
        image.sections.push(Section::new(".data", 0x3000, 0x200, SectionFlags::READ));
        image.sections.push(Section::new(".text", 0x1000, 0x200, SectionFlags::READ));
        assert_eq!(image.lowest_section_rva(), Some(0x1000));
    }
}
