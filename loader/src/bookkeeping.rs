//! Loader metadata patching.
//!
//! Code that asks the process for "its own" module (resource lookups, a
//! null-name module handle query) reads the process image-base record and
//! the first module-list entry. Both still describe the launcher; this step
//! points them at the loaded image instead.

use crate::context::LoadedImage;
use crate::host::LoaderBookkeeping;

/// Point the process bookkeeping at the loaded image.
pub fn patch_loader_metadata<B: LoaderBookkeeping + ?Sized>(loaded: &LoadedImage, bookkeeping: &mut B) {
    let base = loaded.actual_base();

    log::debug!(
        "image base record {:#x} -> {:#x}, head module {:#x} -> {:#x}",
        bookkeeping.image_base(),
        base,
        bookkeeping.head_module_base(),
        base
    );

    bookkeeping.set_image_base(base);
    bookkeeping.set_head_module_base(base);
}
