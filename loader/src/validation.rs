//! # Compatibility Validation
//!
//! Decides whether an image can be loaded by the chosen strategy on this
//! host, before any memory is reserved or written. Checks run in a fixed
//! order and the first failure wins:
//!
//! 1. machine matches the host
//! 2. image is an executable
//! 3. relocatable: image is dynamic-base and carries relocations
//! 4. fixed-base: buffer placement, declared base, size, lowest section

use pefrm_image::{ImageDescription, ImageKind, Machine};

use crate::arch::ArchProfile;
use crate::error::{LoadError, LoadResult, PlacementFault};
use crate::strategy::{FixedBaseLayout, StrategyKind};

fn validate_fixed_base(image: &ImageDescription, layout: &FixedBaseLayout) -> LoadResult<()> {
    let expected = layout.expected_buffer_address();
    if layout.buffer_address != expected {
        return Err(PlacementFault::BufferMisplaced {
            expected,
            actual: layout.buffer_address,
        }
        .into());
    }

    if image.image_base != layout.load_address {
        return Err(PlacementFault::BaseMismatch {
            declared: image.image_base,
            loader: layout.load_address,
        }
        .into());
    }

    if image.image_size > layout.capacity {
        return Err(LoadError::ImageTooLargeForReservedRegion {
            image_size: image.image_size,
            capacity: layout.capacity,
        });
    }

    if let Some(rva) = image.lowest_section_rva().filter(|&rva| rva < layout.buffer_offset) {
        return Err(PlacementFault::SectionBelowBuffer {
            rva,
            buffer_offset: layout.buffer_offset,
        }
        .into());
    }

    Ok(())
}

/// Check `image` against the host and strategy.
///
/// Returns the architecture profile the rest of the load uses.
pub fn validate(image: &ImageDescription, host: Machine, strategy: &StrategyKind) -> LoadResult<ArchProfile> {
    let profile = ArchProfile::for_machine(host)
        .filter(|_| image.machine == host)
        .ok_or(LoadError::ArchitectureMismatch {
            image: image.machine,
            host,
        })?;

    if image.kind != ImageKind::Executable {
        return Err(LoadError::WrongImageKind);
    }

    match strategy {
        StrategyKind::Relocatable => {
            let has_relocations = image.has_relocations();
            if !image.dynamic_base || !has_relocations {
                return Err(LoadError::NotRelocatable {
                    dynamic_base: image.dynamic_base,
                    has_relocations,
                });
            }
        },
        StrategyKind::FixedBase(layout) => validate_fixed_base(image, layout)?,
    }

    log::debug!("validated {} image for {} load", profile, strategy);
    Ok(profile)
}
