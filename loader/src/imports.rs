//! # Import Binding
//!
//! Resolves every imported function through the host and writes its address
//! into the image's address table, one pointer-sized slot per function in
//! declaration order. Delay-load imports are bound the same way, up front,
//! and their module handle slot is filled as well.
//!
//! A module that cannot be loaded or a function that cannot be found stops
//! the load. No slot is ever left unbound while execution continues.

use pefrm_image::{DelayImportDescriptor, ImageDescription, ImportDescriptor, ImportedFunction};

use crate::context::LoadedImage;
use crate::error::{LoadError, LoadResult};
use crate::host::{ModuleHandle, ModuleResolver, SymbolRef};

fn load_dependency<R: ModuleResolver + ?Sized>(resolver: &mut R, module: &str) -> LoadResult<ModuleHandle> {
    resolver
        .load_module(module)
        .ok_or_else(|| LoadError::DependencyResolutionFailure {
            module: module.into(),
        })
}

/// Fill the address table at `thunk_rva` for `functions`
fn bind_thunks<R: ModuleResolver + ?Sized>(
    loaded: &mut LoadedImage,
    resolver: &mut R,
    module: &str,
    handle: ModuleHandle,
    thunk_rva: u32,
    functions: &[ImportedFunction],
) -> LoadResult<usize> {
    let width = loaded.profile().pointer_width;

    for (index, function) in functions.iter().enumerate() {
        let symbol = SymbolRef::from(function);
        let address = resolver.resolve_symbol(handle, symbol).ok_or_else(|| {
            LoadError::SymbolResolutionFailure {
                module: module.into(),
                symbol: symbol.to_string(),
            }
        })?;

        let slot = u32::try_from(index * width.bytes())
            .ok()
            .and_then(|offset| thunk_rva.checked_add(offset))
            .ok_or(LoadError::MalformedImage {
                rva: thunk_rva,
                len: functions.len() * width.bytes(),
            })?;

        loaded.region_mut().write_ptr(slot, address, width)?;
        log::trace!("  {}!{} -> {:#x} (slot {:#x})", module, symbol, address, slot);
    }

    Ok(functions.len())
}

fn bind_descriptor<R: ModuleResolver + ?Sized>(
    loaded: &mut LoadedImage,
    resolver: &mut R,
    descriptor: &ImportDescriptor,
) -> LoadResult<usize> {
    let handle = load_dependency(resolver, &descriptor.module)?;
    bind_thunks(
        loaded,
        resolver,
        &descriptor.module,
        handle,
        descriptor.thunk_rva,
        &descriptor.functions,
    )
}

fn bind_delay_descriptor<R: ModuleResolver + ?Sized>(
    loaded: &mut LoadedImage,
    resolver: &mut R,
    descriptor: &DelayImportDescriptor,
) -> LoadResult<usize> {
    let handle = load_dependency(resolver, &descriptor.module)?;
    let width = loaded.profile().pointer_width;
    loaded
        .region_mut()
        .write_ptr(descriptor.module_handle_rva, handle.0, width)?;

    bind_thunks(
        loaded,
        resolver,
        &descriptor.module,
        handle,
        descriptor.thunk_rva,
        &descriptor.functions,
    )
}

/// Bind the import directory of `image`.
pub fn bind_imports<R: ModuleResolver + ?Sized>(
    image: &ImageDescription,
    loaded: &mut LoadedImage,
    resolver: &mut R,
) -> LoadResult<()> {
    for descriptor in &image.imports {
        log::debug!("binding {} ({} functions)", descriptor.module, descriptor.functions.len());
        let bound = bind_descriptor(loaded, resolver, descriptor)?;
        loaded.stats.modules_bound += 1;
        loaded.stats.functions_bound += bound;
    }
    Ok(())
}

/// Bind the delay-import directory of `image`, eagerly.
pub fn bind_delay_imports<R: ModuleResolver + ?Sized>(
    image: &ImageDescription,
    loaded: &mut LoadedImage,
    resolver: &mut R,
) -> LoadResult<()> {
    for descriptor in &image.delay_imports {
        log::debug!(
            "binding delay-load {} ({} functions)",
            descriptor.module,
            descriptor.functions.len()
        );
        let bound = bind_delay_descriptor(loaded, resolver, descriptor)?;
        loaded.stats.delay_modules_bound += 1;
        loaded.stats.delay_functions_bound += bound;
    }
    Ok(())
}
