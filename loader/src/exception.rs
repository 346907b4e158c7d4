//! Exception directory registration.

use pefrm_image::ImageDescription;

use crate::context::LoadedImage;
use crate::error::{LoadError, LoadResult};
use crate::host::UnwindRegistry;

/// Register the image's runtime function table with the host.
///
/// Only images whose profile uses table-based unwinding are registered; for
/// the others this is a no-op. Entries are handed over with their RVAs and
/// the actual base, the host adds the two.
pub fn register_exception_table<U: UnwindRegistry + ?Sized>(
    image: &ImageDescription,
    loaded: &mut LoadedImage,
    registry: &mut U,
) -> LoadResult<()> {
    let table = &image.exception_functions;
    if !loaded.profile().unwind_table || table.is_empty() {
        return Ok(());
    }

    let end = loaded.region().end_rva();
    if let Some(bad) = table
        .iter()
        .find(|f| f.begin_rva > f.end_rva || u64::from(f.end_rva) > end)
    {
        return Err(LoadError::MalformedImage {
            rva: bad.begin_rva,
            len: bad.end_rva.wrapping_sub(bad.begin_rva) as usize,
        });
    }

    if !registry.register(table, loaded.actual_base()) {
        return Err(LoadError::UnwindRegistrationFailure { count: table.len() });
    }

    log::debug!("registered {} runtime functions at {:#x}", table.len(), loaded.actual_base());
    loaded.stats.unwind_entries += table.len();
    Ok(())
}
