//! # PE Framework Loader
//!
//! Loads a decoded PE executable into the current process and runs it,
//! doing by hand what the OS loader would: lay out sections, apply base
//! relocations, bind imports (delay-load ones included, eagerly), register
//! the exception directory, patch the process loader records and call the
//! entry point.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ ImageDescription│────▶│ Loader::load    │────▶│ entry point     │
//! │ (pefrm-image)   │     │ (8 steps)       │     │ (never returns) │
//! └─────────────────┘     └────────┬────────┘     └─────────────────┘
//!                                  │
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!          ┌──────────────────┐        ┌──────────────────┐
//!          │ ReservationStrat.│        │ Host capabilities│
//!          │ Relocatable /    │        │ Windows /        │
//!          │ FixedBase        │        │ Simulated        │
//!          └──────────────────┘        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pefrm_loader::host::simulated::SimulatedHost;
//! use pefrm_loader::{Loader, Relocatable, StubEntry};
//!
//! # fn run(image: &pefrm_image::ImageDescription) -> pefrm_loader::LoadResult<()> {
//! let mut host = SimulatedHost::permissive(image.machine);
//! let outcome = Loader::new(&mut host).load(image, &mut Relocatable, &mut StubEntry::new())?;
//! log::info!("{}", outcome);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod arch;
pub mod bookkeeping;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod exception;
pub mod host;
pub mod imports;
pub mod mapper;
pub mod pipeline;
pub mod relocation;
pub mod stats;
pub mod strategy;
pub mod validation;

pub use arch::{ArchProfile, PointerWidth, HOST_MACHINE};
pub use config::LoaderConfig;
pub use context::{ImageRegion, LoadedImage};
pub use entry::{EntryInvoker, NativeEntry, StubEntry};
pub use error::{LoadError, LoadResult, PlacementFault};
pub use host::Host;
pub use pipeline::{LoadOutcome, Loader};
pub use stats::LoadStats;
pub use strategy::{
    FixedBase, FixedBaseLayout, Relocatable, ReservationStrategy, StrategyKind, FIXED_BASE_OFFSET,
    FIXED_REQUIRED_IMAGE_SIZE,
};
