//! # Image Mapper
//!
//! Lays sections out at their RVAs. The payload is copied and the rest of
//! the section's virtual size is zeroed explicitly, so the result does not
//! depend on what the region held before.

use pefrm_image::{ImageDescription, Section};

use crate::context::LoadedImage;
use crate::error::{LoadError, LoadResult};
use crate::host::{MemoryManager, Protection};

fn map_section(loaded: &mut LoadedImage, section: &Section) -> LoadResult<()> {
    let rva = section.virtual_address;
    let copied = section.data.len();
    let span = (section.virtual_size as usize).max(copied);

    // Checked before any byte is written, so a bad image leaves the region untouched.
    if section.end_rva() > loaded.region().end_rva() {
        return Err(LoadError::MalformedImage { rva, len: span });
    }

    loaded.region_mut().copy_in(rva, &section.data)?;

    let zeroed = span - copied;
    if zeroed > 0 {
        let tail = u32::try_from(copied)
            .ok()
            .and_then(|len| rva.checked_add(len))
            .ok_or(LoadError::MalformedImage { rva, len: span })?;
        loaded.region_mut().zero(tail, zeroed)?;
    }

    log::trace!(
        "mapped {:<8} at {:#x} ({:#x} bytes, {:#x} zeroed)",
        section.name,
        loaded.address_of(rva),
        copied,
        zeroed
    );

    loaded.stats.sections_mapped += 1;
    loaded.stats.bytes_copied += copied;
    loaded.stats.bytes_zeroed += zeroed;
    Ok(())
}

/// Copy every section of `image` into the loaded region.
///
/// A section reaching past the region is [`LoadError::MalformedImage`].
pub fn map_sections(image: &ImageDescription, loaded: &mut LoadedImage) -> LoadResult<()> {
    for section in &image.sections {
        map_section(loaded, section)?;
    }

    log::debug!(
        "mapped {} sections at {:#x}: {} bytes copied, {} zeroed",
        loaded.stats.sections_mapped,
        loaded.actual_base(),
        loaded.stats.bytes_copied,
        loaded.stats.bytes_zeroed
    );
    Ok(())
}

/// Give each section the page protection its flags ask for.
///
/// Runs after every fix-up, right before entry.
pub fn protect_sections<M: MemoryManager + ?Sized>(
    image: &ImageDescription,
    loaded: &mut LoadedImage,
    memory: &mut M,
) -> LoadResult<()> {
    for section in image.sections.iter().filter(|s| s.virtual_size > 0) {
        let protection = Protection::for_section(section.flags);
        memory.protect(
            loaded.region(),
            section.virtual_address,
            section.virtual_size as usize,
            protection,
        )?;
        log::trace!("protected {:<8} as {:?}", section.name, protection);
        loaded.stats.sections_protected += 1;
    }
    Ok(())
}
