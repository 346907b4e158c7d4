//! # Load Failures
//!
//! Every way a load can fail, as values. Nothing in the loader terminates
//! the process; the launcher maps a [`LoadError`] to its exit code once, at
//! the top.

use core::fmt;

use pefrm_image::Machine;

/// Loader result type
pub type LoadResult<T> = Result<T, LoadError>;

/// Why a fixed-base placement was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementFault {
    /// The image wants a base other than where the loader itself sits
    BaseMismatch {
        /// Declared image base
        declared: u64,
        /// Loader's own load address
        loader: u64,
    },
    /// The reserved buffer is not at `loader + offset`
    BufferMisplaced {
        /// Where the buffer should start
        expected: u64,
        /// Where it actually starts
        actual: u64,
    },
    /// A section starts inside the loader's own header page
    SectionBelowBuffer {
        /// Section RVA
        rva: u32,
        /// First RVA the buffer covers
        buffer_offset: u32,
    },
}

impl fmt::Display for PlacementFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseMismatch { declared, loader } => write!(
                f,
                "image base {:#x} differs from loader base {:#x}",
                declared, loader
            ),
            Self::BufferMisplaced { expected, actual } => write!(
                f,
                "reserved buffer at {:#x}, expected {:#x}",
                actual, expected
            ),
            Self::SectionBelowBuffer { rva, buffer_offset } => write!(
                f,
                "section at RVA {:#x} lies below buffer offset {:#x}",
                rva, buffer_offset
            ),
        }
    }
}

/// Load failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Image targets a different machine than the host
    ArchitectureMismatch {
        /// Machine the image was built for
        image: Machine,
        /// Machine the loader runs on
        host: Machine,
    },
    /// Image is a library, not a program
    WrongImageKind,
    /// Relocatable load requested for an image that cannot move
    NotRelocatable {
        /// Dynamic-base flag of the image
        dynamic_base: bool,
        /// Whether any relocation entries exist
        has_relocations: bool,
    },
    /// Image does not fit the build-time reserved region
    ImageTooLargeForReservedRegion {
        /// Declared image size
        image_size: u32,
        /// RVA span the reserved region covers
        capacity: u32,
    },
    /// Fixed-base placement constraints violated
    InvalidFixedBasePlacement(PlacementFault),
    /// Relocation kind outside the supported set
    UnsupportedRelocationKind {
        /// Raw kind value
        kind: u16,
        /// RVA of the fix-up target
        rva: u32,
    },
    /// A dependency module could not be loaded
    DependencyResolutionFailure {
        /// Module name
        module: String,
    },
    /// A function could not be found in its module
    SymbolResolutionFailure {
        /// Module name
        module: String,
        /// Function name or `#ordinal`
        symbol: String,
    },
    /// Memory for the image could not be reserved
    ReservationFailure {
        /// Requested size in bytes
        size: usize,
    },
    /// Page protection could not be changed
    ProtectionFailure {
        /// First RVA of the range
        rva: u32,
        /// Range length in bytes
        len: usize,
    },
    /// Host refused the unwind table
    UnwindRegistrationFailure {
        /// Number of entries offered
        count: usize,
    },
    /// An access fell outside the reserved region
    MalformedImage {
        /// First RVA of the access
        rva: u32,
        /// Access length in bytes
        len: usize,
    },
}

impl LoadError {
    /// Distinct process exit code for this failure
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ArchitectureMismatch { .. } => 2,
            Self::WrongImageKind => 3,
            Self::NotRelocatable { .. } => 4,
            Self::ImageTooLargeForReservedRegion { .. } => 5,
            Self::InvalidFixedBasePlacement(_) => 6,
            Self::UnsupportedRelocationKind { .. } => 7,
            Self::DependencyResolutionFailure { .. } => 8,
            Self::SymbolResolutionFailure { .. } => 9,
            Self::ReservationFailure { .. } => 10,
            Self::ProtectionFailure { .. } => 11,
            Self::UnwindRegistrationFailure { .. } => 12,
            Self::MalformedImage { .. } => 13,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArchitectureMismatch { image, host } => {
                write!(f, "Image built for {}, host is {}", image, host)
            },
            Self::WrongImageKind => write!(f, "Image is a library, not an executable"),
            Self::NotRelocatable {
                dynamic_base,
                has_relocations,
            } => write!(
                f,
                "Image cannot be relocated (dynamic base: {}, relocations: {})",
                dynamic_base, has_relocations
            ),
            Self::ImageTooLargeForReservedRegion {
                image_size,
                capacity,
            } => write!(
                f,
                "Image size {:#x} exceeds reserved region {:#x}",
                image_size, capacity
            ),
            Self::InvalidFixedBasePlacement(fault) => {
                write!(f, "Invalid fixed-base placement: {}", fault)
            },
            Self::UnsupportedRelocationKind { kind, rva } => {
                write!(f, "Unsupported relocation kind {} at RVA {:#x}", kind, rva)
            },
            Self::DependencyResolutionFailure { module } => {
                write!(f, "Failed to load dependency {}", module)
            },
            Self::SymbolResolutionFailure { module, symbol } => {
                write!(f, "Failed to resolve {} in {}", symbol, module)
            },
            Self::ReservationFailure { size } => {
                write!(f, "Failed to reserve {:#x} bytes for the image", size)
            },
            Self::ProtectionFailure { rva, len } => {
                write!(f, "Failed to change protection of RVA {:#x}+{:#x}", rva, len)
            },
            Self::UnwindRegistrationFailure { count } => {
                write!(f, "Host refused unwind table of {} entries", count)
            },
            Self::MalformedImage { rva, len } => {
                write!(f, "Access at RVA {:#x}+{:#x} outside the image region", rva, len)
            },
        }
    }
}

impl std::error::Error for LoadError {}

impl From<PlacementFault> for LoadError {
    fn from(fault: PlacementFault) -> Self {
        Self::InvalidFixedBasePlacement(fault)
    }
}
