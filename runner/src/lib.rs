//! # PE Launchers
//!
//! Shared plumbing for the two launcher binaries:
//!
//! - `pefrm-run-basic` maps an image anywhere and relocates it
//! - `pefrm-run-fixed` is linked at the payload's base and loads it into a
//!   buffer it reserves inside its own image
//!
//! Both read their settings from the environment (see [`config`]), log to
//! stderr (see [`logger`]) and exit with the code of the first failure.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod launch;
pub mod logger;

pub use config::{parse_machine, RunnerConfig, DEFAULT_FIXED_IMAGE, DEFAULT_RELOCATABLE_IMAGE};
pub use error::{RunnerError, RunnerResult};
pub use launch::{read_image, run_fixed, run_relocatable, terminate};
