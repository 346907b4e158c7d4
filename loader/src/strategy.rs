//! # Reservation Strategies
//!
//! Where the image goes, and whether it has to move:
//!
//! | Strategy        | Region                         | Relocation |
//! |-----------------|--------------------------------|------------|
//! | [`Relocatable`] | fresh memory from the host     | required   |
//! | [`FixedBase`]   | buffer reserved at build time  | never      |
//!
//! The fixed-base buffer sits inside the launcher's own image, right after
//! its header page, so the launcher and the payload share one base address.

use core::fmt;

use pefrm_image::ImageDescription;

use crate::context::ImageRegion;
use crate::error::{LoadError, LoadResult};
use crate::host::{MemoryManager, Protection};

// ============================================================================
// CONSTANTS
// ============================================================================

/// RVA the fixed-base buffer starts at (one header page)
pub const FIXED_BASE_OFFSET: u32 = 0x1000;

/// RVA span the fixed-base runner reserves for its payload
pub const FIXED_REQUIRED_IMAGE_SIZE: u32 = 0x0118_0000;

// ============================================================================
// STRATEGY KINDS
// ============================================================================

/// Placement facts the validator checks a fixed-base load against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBaseLayout {
    /// Address the launcher itself was loaded at
    pub load_address: u64,
    /// Address the reserved buffer actually starts at
    pub buffer_address: u64,
    /// RVA the buffer is supposed to start at
    pub buffer_offset: u32,
    /// One past the last RVA the buffer covers
    pub capacity: u32,
}

impl FixedBaseLayout {
    /// Describe a reserved region for a launcher loaded at `load_address`
    pub fn of(load_address: u64, region: &ImageRegion) -> Self {
        let window_start = region.window_start();
        Self {
            load_address,
            buffer_address: region.address_of(window_start),
            buffer_offset: window_start,
            capacity: u32::try_from(region.end_rva()).unwrap_or(u32::MAX),
        }
    }

    /// Where the buffer has to start for the image to land at `load_address`
    pub fn expected_buffer_address(&self) -> u64 {
        self.load_address.wrapping_add(u64::from(self.buffer_offset))
    }
}

/// Which strategy a load uses, as seen by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Map anywhere, relocate
    Relocatable,
    /// Map into the reserved buffer at the declared base
    FixedBase(FixedBaseLayout),
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relocatable => write!(f, "relocatable"),
            Self::FixedBase(layout) => write!(f, "fixed-base at {:#x}", layout.load_address),
        }
    }
}

/// Memory handed to the pipeline by a strategy
#[derive(Debug)]
pub struct Reservation {
    /// Region the image will be mapped into
    pub region: ImageRegion,
    /// Whether base relocations must be applied
    pub requires_relocation: bool,
}

/// Supplies the memory an image is loaded into
pub trait ReservationStrategy {
    /// Kind and placement facts, checked before any memory is touched
    fn kind(&self) -> StrategyKind;

    /// Produce the region for `image`
    fn reserve(&mut self, image: &ImageDescription, memory: &mut dyn MemoryManager) -> LoadResult<Reservation>;
}

// ============================================================================
// RELOCATABLE
// ============================================================================

/// Reserve fresh memory wherever the host puts it
#[derive(Debug, Default, Clone, Copy)]
pub struct Relocatable;

impl ReservationStrategy for Relocatable {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Relocatable
    }

    fn reserve(&mut self, image: &ImageDescription, memory: &mut dyn MemoryManager) -> LoadResult<Reservation> {
        let size = image.image_size as usize;
        let region = memory.reserve(size)?;
        log::info!("reserved {:#x} bytes at {:#x}", size, region.base_address());
        Ok(Reservation {
            region,
            requires_relocation: true,
        })
    }
}

// ============================================================================
// FIXED BASE
// ============================================================================

/// Load into a buffer reserved at the image's declared base
#[derive(Debug)]
pub struct FixedBase {
    layout: FixedBaseLayout,
    region: Option<ImageRegion>,
}

impl FixedBase {
    /// Use `region` for a launcher loaded at `load_address`
    pub fn new(load_address: u64, region: ImageRegion) -> Self {
        Self {
            layout: FixedBaseLayout::of(load_address, &region),
            region: Some(region),
        }
    }

    /// Placement facts of the reserved buffer
    pub fn layout(&self) -> &FixedBaseLayout {
        &self.layout
    }
}

impl ReservationStrategy for FixedBase {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FixedBase(self.layout)
    }

    fn reserve(&mut self, _image: &ImageDescription, memory: &mut dyn MemoryManager) -> LoadResult<Reservation> {
        let region = self.region.take().ok_or(LoadError::ReservationFailure { size: 0 })?;

        // The buffer lives in the launcher's data section; make it executable.
        memory.protect(&region, region.window_start(), region.len(), Protection::RWX)?;
        log::info!(
            "using reserved buffer {:#x}..{:#x}",
            self.layout.buffer_address,
            region.address_of(self.layout.capacity)
        );

        Ok(Reservation {
            region,
            requires_relocation: false,
        })
    }
}
