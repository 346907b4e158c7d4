//! # Loaded Image Context
//!
//! [`ImageRegion`] is the memory an image is mapped into, addressed by RVA.
//! Every read and write is bounds-checked against the region; an access
//! outside it is a [`LoadError::MalformedImage`], never a stray write.
//!
//! A region covers the RVA window `[window_start, window_start + len)`.
//! Freshly reserved regions start at RVA 0. The fixed-base buffer starts
//! past the loader's own header page, so its window starts at the fixed
//! offset and RVAs below it are not addressable.
//!
//! [`LoadedImage`] ties a region to the addresses the image was linked for
//! and the architecture profile chosen for the load.

use core::fmt;
use core::ops::Range;
use core::ptr::NonNull;

use crate::arch::{ArchProfile, PointerWidth};
use crate::error::{LoadError, LoadResult};
use crate::stats::LoadStats;

// ============================================================================
// IMAGE REGION
// ============================================================================

enum Storage {
    /// Heap memory standing in for the image (simulated host)
    Owned(Box<[u8]>),
    /// Real process memory the image will execute from
    Mapped { ptr: NonNull<u8>, len: usize },
}

/// Bounds-checked, RVA-addressed image memory
pub struct ImageRegion {
    storage: Storage,
    base_address: u64,
    window_start: u32,
}

impl ImageRegion {
    /// Heap-backed region that pretends to live at `base_address`.
    ///
    /// Every byte starts out as `fill`, which lets callers model memory that
    /// was not handed over zeroed.
    pub fn owned(base_address: u64, size: usize, fill: u8) -> Self {
        Self::owned_window(base_address, 0, size, fill)
    }

    /// Heap-backed region whose first addressable RVA is `window_start`
    pub fn owned_window(base_address: u64, window_start: u32, size: usize, fill: u8) -> Self {
        Self {
            storage: Storage::Owned(vec![fill; size].into_boxed_slice()),
            base_address,
            window_start,
        }
    }

    /// Region over real process memory.
    ///
    /// `ptr` is the address of RVA `window_start`; the image base is
    /// therefore `ptr - window_start`.
    ///
    /// # Safety
    ///
    /// - `ptr..ptr + len` must be valid for reads and writes for as long as
    ///   the region (and anything executing from it) is alive
    /// - nothing else may access that memory through another reference
    ///   while the region exists
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize, window_start: u32) -> Self {
        let address = ptr.as_ptr() as usize as u64;
        Self {
            storage: Storage::Mapped { ptr, len },
            base_address: address.wrapping_sub(u64::from(window_start)),
            window_start,
        }
    }

    /// Address RVA 0 corresponds to
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// First addressable RVA
    #[inline]
    pub fn window_start(&self) -> u32 {
        self.window_start
    }

    /// Addressable length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.len(),
            Storage::Mapped { len, .. } => *len,
        }
    }

    /// Returns `true` if nothing is addressable.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last addressable RVA
    pub fn end_rva(&self) -> u64 {
        u64::from(self.window_start) + self.len() as u64
    }

    /// Absolute address of an RVA
    #[inline]
    pub fn address_of(&self, rva: u32) -> u64 {
        self.base_address.wrapping_add(u64::from(rva))
    }

    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes,
            // SAFETY: `from_raw` callers guarantee the range stays valid and unaliased.
            Storage::Mapped { ptr, len } => unsafe { core::slice::from_raw_parts(ptr.as_ptr(), *len) },
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Owned(bytes) => bytes,
            // SAFETY: as above, and `&mut self` makes this the only live view.
            Storage::Mapped { ptr, len } => unsafe {
                core::slice::from_raw_parts_mut(ptr.as_ptr(), *len)
            },
        }
    }

    fn range(&self, rva: u32, len: usize) -> LoadResult<Range<usize>> {
        let out_of_bounds = LoadError::MalformedImage { rva, len };
        let start = rva
            .checked_sub(self.window_start)
            .ok_or_else(|| out_of_bounds.clone())? as usize;
        let end = start.checked_add(len).ok_or_else(|| out_of_bounds.clone())?;
        if end > self.len() {
            return Err(out_of_bounds);
        }
        Ok(start..end)
    }

    /// Borrow `len` bytes at `rva`
    pub fn slice(&self, rva: u32, len: usize) -> LoadResult<&[u8]> {
        let range = self.range(rva, len)?;
        Ok(&self.bytes()[range])
    }

    /// Mutably borrow `len` bytes at `rva`
    pub fn slice_mut(&mut self, rva: u32, len: usize) -> LoadResult<&mut [u8]> {
        let range = self.range(rva, len)?;
        Ok(&mut self.bytes_mut()[range])
    }

    /// Copy `data` to `rva`
    pub fn copy_in(&mut self, rva: u32, data: &[u8]) -> LoadResult<()> {
        self.slice_mut(rva, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Zero `len` bytes at `rva`
    pub fn zero(&mut self, rva: u32, len: usize) -> LoadResult<()> {
        self.slice_mut(rva, len)?.fill(0);
        Ok(())
    }

    /// Read a little-endian `u32`
    pub fn read_u32(&self, rva: u32) -> LoadResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.slice(rva, 4)?);
        Ok(u32::from_le_bytes(raw))
    }

    /// Write a little-endian `u32`
    pub fn write_u32(&mut self, rva: u32, value: u32) -> LoadResult<()> {
        self.copy_in(rva, &value.to_le_bytes())
    }

    /// Read a little-endian `u64`
    pub fn read_u64(&self, rva: u32) -> LoadResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.slice(rva, 8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a little-endian `u64`
    pub fn write_u64(&mut self, rva: u32, value: u64) -> LoadResult<()> {
        self.copy_in(rva, &value.to_le_bytes())
    }

    /// Read an address slot of the given width
    pub fn read_ptr(&self, rva: u32, width: PointerWidth) -> LoadResult<u64> {
        match width {
            PointerWidth::Bits32 => self.read_u32(rva).map(u64::from),
            PointerWidth::Bits64 => self.read_u64(rva),
        }
    }

    /// Write an address slot of the given width
    pub fn write_ptr(&mut self, rva: u32, value: u64, width: PointerWidth) -> LoadResult<()> {
        match width {
            PointerWidth::Bits32 => self.write_u32(rva, value as u32),
            PointerWidth::Bits64 => self.write_u64(rva, value),
        }
    }
}

impl fmt::Debug for ImageRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegion")
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("window_start", &format_args!("{:#x}", self.window_start))
            .field("len", &format_args!("{:#x}", self.len()))
            .field("mapped", &matches!(self.storage, Storage::Mapped { .. }))
            .finish()
    }
}

// ============================================================================
// LOADED IMAGE
// ============================================================================

/// An image in the middle of being loaded
#[derive(Debug)]
pub struct LoadedImage {
    region: ImageRegion,
    declared_base: u64,
    profile: ArchProfile,
    requires_relocation: bool,
    /// Counters collected by the pipeline steps
    pub stats: LoadStats,
}

impl LoadedImage {
    /// Wrap a reserved region
    pub fn new(region: ImageRegion, declared_base: u64, profile: ArchProfile, requires_relocation: bool) -> Self {
        Self {
            region,
            declared_base,
            profile,
            requires_relocation,
            stats: LoadStats::new(),
        }
    }

    /// Backing region
    #[inline]
    pub fn region(&self) -> &ImageRegion {
        &self.region
    }

    /// Mutable backing region
    #[inline]
    pub fn region_mut(&mut self) -> &mut ImageRegion {
        &mut self.region
    }

    /// Address the image was linked for
    #[inline]
    pub fn declared_base(&self) -> u64 {
        self.declared_base
    }

    /// Address the image is actually mapped at
    #[inline]
    pub fn actual_base(&self) -> u64 {
        self.region.base_address()
    }

    /// `actual - declared`, two's complement
    #[inline]
    pub fn delta(&self) -> u64 {
        self.actual_base().wrapping_sub(self.declared_base)
    }

    /// Architecture rules for this load
    #[inline]
    pub fn profile(&self) -> &ArchProfile {
        &self.profile
    }

    /// Whether the reservation strategy asks for relocation
    #[inline]
    pub fn requires_relocation(&self) -> bool {
        self.requires_relocation
    }

    /// Translate a linked address to where it lives now
    #[inline]
    pub fn rebase(&self, linked: u64) -> u64 {
        linked.wrapping_sub(self.declared_base).wrapping_add(self.actual_base())
    }

    /// Absolute address of an RVA in the loaded image
    #[inline]
    pub fn address_of(&self, rva: u32) -> u64 {
        self.region.address_of(rva)
    }
}
