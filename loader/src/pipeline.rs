//! # Load Pipeline
//!
//! ```text
//! ┌──────────┐  ┌─────────┐  ┌──────────┐  ┌───────────┐  ┌─────────────┐
//! │ validate │─▶│ reserve │─▶│ map      │─▶│ relocate  │─▶│ bind imports│
//! └──────────┘  └─────────┘  └──────────┘  └───────────┘  └──────┬──────┘
//!                                                               │
//! ┌──────────┐  ┌─────────┐  ┌──────────────┐  ┌───────────────┐ │
//! │  enter   │◀─│ protect │◀─│ bookkeeping  │◀─│ unwind table  │◀┘
//! └──────────┘  └─────────┘  └──────────────┘  └───────────────┘
//! ```
//!
//! Steps run strictly in this order and the first failure ends the load.
//! Failures during validation leave no trace; later failures abandon the
//! region as it is.

use core::fmt;

use pefrm_image::ImageDescription;

use crate::bookkeeping::patch_loader_metadata;
use crate::config::LoaderConfig;
use crate::context::LoadedImage;
use crate::entry::EntryInvoker;
use crate::error::LoadResult;
use crate::exception::register_exception_table;
use crate::host::Host;
use crate::imports::{bind_delay_imports, bind_imports};
use crate::mapper::{map_sections, protect_sections};
use crate::relocation::apply_relocations;
use crate::stats::LoadStats;
use crate::strategy::ReservationStrategy;
use crate::validation::validate;

/// What happened when the entry point returned control
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The entry point returned; only stub invokers or unusual payloads do
    Returned {
        /// Address control was transferred to
        entry_address: u64,
        /// Address the image was mapped at
        actual_base: u64,
        /// Counters collected during the load
        stats: LoadStats,
    },
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned {
                entry_address,
                actual_base,
                ..
            } => write!(
                f,
                "entry point {:#x} returned (image at {:#x})",
                entry_address, actual_base
            ),
        }
    }
}

/// Manual loader bound to a host
#[derive(Debug)]
pub struct Loader<'h, H: Host> {
    host: &'h mut H,
    config: LoaderConfig,
}

impl<'h, H: Host> Loader<'h, H> {
    /// Loader with default configuration
    pub fn new(host: &'h mut H) -> Self {
        Self::with_config(host, LoaderConfig::default())
    }

    /// Loader with explicit configuration
    pub fn with_config(host: &'h mut H, config: LoaderConfig) -> Self {
        Self { host, config }
    }

    /// Load `image` and transfer control to it.
    ///
    /// With a native invoker this does not return on success.
    pub fn load<S, E>(&mut self, image: &ImageDescription, strategy: &mut S, entry: &mut E) -> LoadResult<LoadOutcome>
    where
        S: ReservationStrategy + ?Sized,
        E: EntryInvoker + ?Sized,
    {
        log::info!(
            "loading {} image (base {:#x}, size {:#x}) with {} strategy",
            image.machine,
            image.image_base,
            image.image_size,
            strategy.kind()
        );

        // 1. Compatibility
        let mut profile = validate(image, self.host.host_arch(), &strategy.kind())?;
        if !self.config.strict_relocations {
            profile = profile.with_all_relocation_kinds();
        }

        // 2. Reservation + mapping
        let reservation = strategy.reserve(image, &mut *self.host)?;
        let mut loaded = LoadedImage::new(
            reservation.region,
            image.image_base,
            profile,
            reservation.requires_relocation,
        );
        map_sections(image, &mut loaded)?;
        log::info!("mapped {} sections at {:#x}", image.sections.len(), loaded.actual_base());

        // 3. Relocation
        apply_relocations(image, &mut loaded)?;

        // 4-5. Dependencies
        bind_imports(image, &mut loaded, &mut *self.host)?;
        bind_delay_imports(image, &mut loaded, &mut *self.host)?;
        log::info!(
            "bound {} modules ({} delay-load)",
            loaded.stats.modules_bound,
            loaded.stats.delay_modules_bound
        );

        // 6. Exception directory
        if self.config.register_unwind_table {
            register_exception_table(image, &mut loaded, &mut *self.host)?;
        }

        // 7. Loader bookkeeping
        if self.config.patch_bookkeeping {
            patch_loader_metadata(&loaded, &mut *self.host);
        }

        if self.config.apply_section_protection {
            protect_sections(image, &mut loaded, &mut *self.host)?;
        }

        log::debug!("{}", loaded.stats);

        // 8. Entry
        let entry_address = loaded.address_of(image.entry_point);
        entry.invoke(entry_address)?;

        Ok(LoadOutcome::Returned {
            entry_address,
            actual_base: loaded.actual_base(),
            stats: loaded.stats,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
