//! # Relocation Processor
//!
//! Applies PE base relocations to a mapped image so that absolute addresses
//! baked in for the declared base point into the actual one.
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ Relocation block │────▶│ page + offset    │────▶│ value - declared │
//! │ (page RVA)       │     │ (target RVA)     │     │       + actual   │
//! └──────────────────┘     └──────────────────┘     └──────────────────┘
//! ```
//!
//! Only the three kinds a Windows x86 / x64 linker emits are understood.
//! Anything else stops the load at the offending entry; fix-ups already
//! written stay written.

use core::fmt;

use pefrm_image::{ImageDescription, RelocationEntry};

use crate::context::LoadedImage;
use crate::error::{LoadError, LoadResult};

// ============================================================================
// RELOCATION KINDS
// ============================================================================

/// Relocation kinds the processor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// Padding, no fix-up
    Absolute,
    /// 32-bit additive fix-up
    HighLow,
    /// 64-bit additive fix-up
    Dir64,
}

impl RelocationKind {
    /// Every kind the processor implements
    pub const ALL: &'static [Self] = &[Self::Absolute, Self::HighLow, Self::Dir64];

    /// Decode a raw kind value
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            RelocationEntry::ABSOLUTE => Some(Self::Absolute),
            RelocationEntry::HIGHLOW => Some(Self::HighLow),
            RelocationEntry::DIR64 => Some(Self::Dir64),
            _ => None,
        }
    }

    /// Conventional name
    pub fn name(self) -> &'static str {
        match self {
            Self::Absolute => "IMAGE_REL_BASED_ABSOLUTE",
            Self::HighLow => "IMAGE_REL_BASED_HIGHLOW",
            Self::Dir64 => "IMAGE_REL_BASED_DIR64",
        }
    }
}

impl fmt::Display for RelocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Apply one entry at `rva`
fn apply_single_reloc(loaded: &mut LoadedImage, kind: RelocationKind, rva: u32) -> LoadResult<()> {
    match kind {
        RelocationKind::Absolute => {
            loaded.stats.relocations_skipped += 1;
        },

        RelocationKind::HighLow => {
            let current = loaded.region().read_u32(rva)?;
            let value = loaded.rebase(u64::from(current)) as u32;
            loaded.region_mut().write_u32(rva, value)?;
            loaded.stats.highlow += 1;
            loaded.stats.relocations_applied += 1;
        },

        RelocationKind::Dir64 => {
            let current = loaded.region().read_u64(rva)?;
            let value = loaded.rebase(current);
            loaded.region_mut().write_u64(rva, value)?;
            loaded.stats.dir64 += 1;
            loaded.stats.relocations_applied += 1;
        },
    }

    Ok(())
}

/// Apply every base relocation of `image` to `loaded`.
///
/// Nothing is written when the strategy placed the image at its declared
/// base. The first unsupported kind aborts with
/// [`LoadError::UnsupportedRelocationKind`]; earlier fix-ups are not undone.
pub fn apply_relocations(image: &ImageDescription, loaded: &mut LoadedImage) -> LoadResult<()> {
    let total = image.relocation_count();

    // Fast path: no delta means nothing to patch
    if !loaded.requires_relocation() || loaded.delta() == 0 {
        log::debug!("relocation skipped: image at declared base {:#x}", loaded.declared_base());
        loaded.stats.relocations_skipped += total;
        loaded.stats.relocations_total += total;
        return Ok(());
    }

    #[cfg(feature = "debug_reloc")]
    debug_dump_relocations(image);

    let profile = *loaded.profile();

    for block in &image.relocations {
        for entry in &block.entries {
            let rva = block
                .page_rva
                .checked_add(u32::from(entry.offset))
                .ok_or(LoadError::MalformedImage {
                    rva: block.page_rva,
                    len: usize::from(entry.offset),
                })?;

            let kind = RelocationKind::from_raw(entry.kind)
                .filter(|kind| profile.supports(*kind))
                .ok_or(LoadError::UnsupportedRelocationKind { kind: entry.kind, rva })?;

            loaded.stats.relocations_total += 1;
            apply_single_reloc(loaded, kind, rva)?;
        }
    }

    log::debug!(
        "relocated {:#x} -> {:#x}: {} applied, {} skipped",
        loaded.declared_base(),
        loaded.actual_base(),
        loaded.stats.relocations_applied,
        loaded.stats.relocations_skipped
    );

    Ok(())
}

// ============================================================================
// DEBUG HELPERS
// ============================================================================

/// Dumps every relocation block and entry to the trace log.
#[cfg(feature = "debug_reloc")]
pub fn debug_dump_relocations(image: &ImageDescription) {
    log::trace!("Relocation blocks ({}):", image.relocations.len());
    for block in &image.relocations {
        log::trace!("  page {:#010x} ({} entries)", block.page_rva, block.entries.len());
        for entry in &block.entries {
            let name = RelocationKind::from_raw(entry.kind).map_or("UNKNOWN", RelocationKind::name);
            log::trace!("    +{:#05x} kind={:2} ({})", entry.offset, entry.kind, name);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchProfile;
    use crate::context::ImageRegion;
    use pefrm_image::{Machine, RelocationBlock};

    const DECLARED: u64 = 0x1_4000_0000;
    const ACTUAL: u64 = 0x2_0000_0000;

    fn loaded_at(actual: u64, profile: ArchProfile) -> LoadedImage {
        LoadedImage::new(ImageRegion::owned(actual, 0x3000, 0), DECLARED, profile, true)
    }

    #[test]
    fn test_kind_from_raw() {
        assert_eq!(RelocationKind::from_raw(0), Some(RelocationKind::Absolute));
        assert_eq!(RelocationKind::from_raw(3), Some(RelocationKind::HighLow));
        assert_eq!(RelocationKind::from_raw(10), Some(RelocationKind::Dir64));
        assert_eq!(RelocationKind::from_raw(5), None);
        assert_eq!(RelocationKind::Dir64.name(), "IMAGE_REL_BASED_DIR64");
    }

    #[test]
    fn test_relocation_arithmetic() {
        let mut image = ImageDescription::new(Machine::Amd64, DECLARED, 0x3000);
        image.relocations.push(
            RelocationBlock::new(0x1000)
                .with_entry(0x010, RelocationEntry::DIR64)
                .with_entry(0x020, RelocationEntry::HIGHLOW)
                .with_entry(0x000, RelocationEntry::ABSOLUTE),
        );

        let mut loaded = loaded_at(ACTUAL, ArchProfile::X64);
        loaded.region_mut().write_u64(0x1010, DECLARED + 0x1234).unwrap();
        loaded.region_mut().write_u32(0x1020, (DECLARED as u32).wrapping_add(0x40)).unwrap();
        loaded.region_mut().write_u32(0x1000, 0xDEAD_BEEF).unwrap();

        apply_relocations(&image, &mut loaded).unwrap();

        assert_eq!(loaded.region().read_u64(0x1010).unwrap(), ACTUAL + 0x1234);
        assert_eq!(
            loaded.region().read_u32(0x1020).unwrap(),
            (ACTUAL as u32).wrapping_add(0x40)
        );
        // absolute entries never write
        assert_eq!(loaded.region().read_u32(0x1000).unwrap(), 0xDEAD_BEEF);

        assert_eq!(loaded.stats.relocations_total, 3);
        assert_eq!(loaded.stats.relocations_applied, 2);
        assert_eq!(loaded.stats.relocations_skipped, 1);
        assert_eq!(loaded.stats.dir64, 1);
        assert_eq!(loaded.stats.highlow, 1);
    }

    #[test]
    fn test_downward_delta() {
        let mut image = ImageDescription::new(Machine::Amd64, DECLARED, 0x3000);
        image
            .relocations
            .push(RelocationBlock::new(0x2000).with_entry(0x8, RelocationEntry::DIR64));

        let actual = 0x1000_0000;
        let mut loaded = loaded_at(actual, ArchProfile::X64);
        loaded.region_mut().write_u64(0x2008, DECLARED + 0x2000).unwrap();

        apply_relocations(&image, &mut loaded).unwrap();
        assert_eq!(loaded.region().read_u64(0x2008).unwrap(), actual + 0x2000);
    }

    #[test]
    fn test_highlow_on_x86_wraps_at_32_bits() {
        let declared = 0x40_0000;
        let actual = 0x1000_0000;
        let mut image = ImageDescription::new(Machine::I386, declared, 0x3000);
        image.relocations.push(
            RelocationBlock::new(0x1000)
                .with_entry(0x004, RelocationEntry::HIGHLOW)
                .with_entry(0x008, RelocationEntry::HIGHLOW),
        );

        let region = ImageRegion::owned(actual, 0x3000, 0);
        let mut loaded = LoadedImage::new(region, declared, ArchProfile::X86, true);
        loaded.region_mut().write_u32(0x1004, 0x0040_1234).unwrap();
        // linked near the top of the address space; the sum passes 2^32
        loaded.region_mut().write_u32(0x1008, 0xFFC0_0010).unwrap();
        loaded.region_mut().write_u32(0x100C, 0x1111_1111).unwrap();

        apply_relocations(&image, &mut loaded).unwrap();

        assert_eq!(loaded.region().read_u32(0x1004).unwrap(), 0x1000_1234);
        assert_eq!(loaded.region().read_u32(0x1008).unwrap(), 0x0F80_0010);
        // the neighbouring dword is not touched by the truncated write
        assert_eq!(loaded.region().read_u32(0x100C).unwrap(), 0x1111_1111);
        assert_eq!(loaded.stats.highlow, 2);
    }

    #[test]
    fn test_zero_delta_writes_nothing() {
        let mut image = ImageDescription::new(Machine::Amd64, DECLARED, 0x3000);
        image
            .relocations
            .push(RelocationBlock::new(0x1000).with_entry(0x0, 7));

        let mut loaded = loaded_at(DECLARED, ArchProfile::X64);
        loaded.region_mut().write_u64(0x1000, 42).unwrap();

        // even an unknown kind is never looked at
        apply_relocations(&image, &mut loaded).unwrap();
        assert_eq!(loaded.region().read_u64(0x1000).unwrap(), 42);
        assert_eq!(loaded.stats.relocations_applied, 0);
    }

    #[test]
    fn test_unknown_kind_aborts_immediately() {
        let mut image = ImageDescription::new(Machine::Amd64, DECLARED, 0x3000);
        image.relocations.push(
            RelocationBlock::new(0x1000)
                .with_entry(0x000, RelocationEntry::DIR64)
                .with_entry(0x008, 4) // IMAGE_REL_BASED_HIGHADJ
                .with_entry(0x010, RelocationEntry::DIR64),
        );

        let mut loaded = loaded_at(ACTUAL, ArchProfile::X64);
        loaded.region_mut().write_u64(0x1000, DECLARED).unwrap();
        loaded.region_mut().write_u64(0x1010, DECLARED).unwrap();

        let err = apply_relocations(&image, &mut loaded).unwrap_err();
        assert_eq!(err, LoadError::UnsupportedRelocationKind { kind: 4, rva: 0x1008 });
        assert_eq!(err.exit_code(), 7);

        // the earlier fix-up stays, the later one was never made
        assert_eq!(loaded.region().read_u64(0x1000).unwrap(), ACTUAL);
        assert_eq!(loaded.region().read_u64(0x1010).unwrap(), DECLARED);
    }

    #[test]
    fn test_dir64_rejected_on_x86() {
        let mut image = ImageDescription::new(Machine::I386, DECLARED, 0x3000);
        image
            .relocations
            .push(RelocationBlock::new(0x1000).with_entry(0x0, RelocationEntry::DIR64));

        let mut loaded = loaded_at(ACTUAL, ArchProfile::X86);
        assert_eq!(
            apply_relocations(&image, &mut loaded),
            Err(LoadError::UnsupportedRelocationKind {
                kind: RelocationEntry::DIR64,
                rva: 0x1000
            })
        );

        let mut loaded = loaded_at(ACTUAL, ArchProfile::X86.with_all_relocation_kinds());
        assert!(apply_relocations(&image, &mut loaded).is_ok());
    }

    #[test]
    fn test_target_outside_region() {
        let mut image = ImageDescription::new(Machine::Amd64, DECLARED, 0x3000);
        image
            .relocations
            .push(RelocationBlock::new(0x2000).with_entry(0xFFC, RelocationEntry::DIR64));

        let mut loaded = loaded_at(ACTUAL, ArchProfile::X64);
        assert_eq!(
            apply_relocations(&image, &mut loaded),
            Err(LoadError::MalformedImage { rva: 0x2FFC, len: 8 })
        );
    }
}
