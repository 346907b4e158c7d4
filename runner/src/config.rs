//! # Launcher Configuration
//!
//! Read from the environment; nothing is taken from the command line.
//!
//! | Variable             | Meaning                                   | Default        |
//! |----------------------|-------------------------------------------|----------------|
//! | `PEFRM_IMAGE`        | image file to load                        | per launcher   |
//! | `PEFRM_LOG`          | log level (`off` .. `trace`)              | `info`         |
//! | `PEFRM_OPTIONS`      | loader options, see `LoaderConfig`        | empty          |
//! | `PEFRM_DRY_RUN`      | load into a simulated host, do not enter  | off            |
//! | `PEFRM_DRY_RUN_ARCH` | machine the simulated host claims         | build target   |
//!
//! `PEFRM_DRY_RUN_ARCH` takes `x86`, `x64` or `arm64`.

use std::env;
use std::path::PathBuf;

use log::LevelFilter;
use pefrm_image::Machine;
use pefrm_loader::{LoaderConfig, HOST_MACHINE};

/// Image the relocatable launcher loads by default
pub const DEFAULT_RELOCATABLE_IMAGE: &str = "calc.exe";

/// Image the fixed-base launcher loads by default
pub const DEFAULT_FIXED_IMAGE: &str = "fixed.exe";

/// Launcher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Image file to load
    pub image_path: PathBuf,
    /// Console log level
    pub log_level: LevelFilter,
    /// Loader switches
    pub loader: LoaderConfig,
    /// Load against the simulated host and stub the entry call
    pub dry_run: bool,
    /// Machine the simulated host reports
    pub dry_run_machine: Machine,
}

/// Parse a machine name as accepted by `PEFRM_DRY_RUN_ARCH`
pub fn parse_machine(name: &str) -> Option<Machine> {
    match name.trim().to_ascii_lowercase().as_str() {
        "x86" | "i386" => Some(Machine::I386),
        "x64" | "amd64" | "x86_64" => Some(Machine::Amd64),
        "arm64" | "aarch64" => Some(Machine::Arm64),
        _ => None,
    }
}

impl RunnerConfig {
    /// Configuration from the process environment
    pub fn from_env(default_image: &str) -> Self {
        Self::from_lookup(default_image, |key| env::var(key).ok())
    }

    /// Configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(default_image: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let image_path = lookup("PEFRM_IMAGE")
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| default_image.to_string());

        let log_level = lookup("PEFRM_LOG")
            .and_then(|level| level.trim().parse().ok())
            .unwrap_or(LevelFilter::Info);

        let loader = lookup("PEFRM_OPTIONS")
            .map(|options| LoaderConfig::from_options(&options))
            .unwrap_or_default();

        let dry_run = lookup("PEFRM_DRY_RUN").is_some_and(|value| {
            matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        });

        let dry_run_machine = match lookup("PEFRM_DRY_RUN_ARCH") {
            Some(name) => parse_machine(&name).unwrap_or_else(|| {
                log::warn!("unknown dry-run architecture '{}', using {}", name.trim(), HOST_MACHINE);
                HOST_MACHINE
            }),
            None => HOST_MACHINE,
        };

        Self {
            image_path: image_path.into(),
            log_level,
            loader,
            dry_run,
            dry_run_machine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_lookup(DEFAULT_RELOCATABLE_IMAGE, lookup_in(&[]));
        assert_eq!(config.image_path, PathBuf::from("calc.exe"));
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.loader, LoaderConfig::default());
        assert!(!config.dry_run);
        assert_eq!(config.dry_run_machine, HOST_MACHINE);
    }

    #[test]
    fn test_overrides() {
        let config = RunnerConfig::from_lookup(
            DEFAULT_FIXED_IMAGE,
            lookup_in(&[
                ("PEFRM_IMAGE", "gta_sa.exe"),
                ("PEFRM_LOG", "Debug"),
                ("PEFRM_OPTIONS", "protect nounwind"),
                ("PEFRM_DRY_RUN", "TRUE"),
                ("PEFRM_DRY_RUN_ARCH", " X86 "),
            ]),
        );
        assert_eq!(config.image_path, PathBuf::from("gta_sa.exe"));
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert!(config.loader.apply_section_protection);
        assert!(!config.loader.register_unwind_table);
        assert!(config.dry_run);
        assert_eq!(config.dry_run_machine, Machine::I386);
    }

    #[test]
    fn test_parse_machine() {
        assert_eq!(parse_machine("aarch64"), Some(Machine::Arm64));
        assert_eq!(parse_machine("AMD64"), Some(Machine::Amd64));
        assert_eq!(parse_machine("mips"), None);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = RunnerConfig::from_lookup(
            DEFAULT_FIXED_IMAGE,
            lookup_in(&[
                ("PEFRM_IMAGE", "  "),
                ("PEFRM_LOG", "loud"),
                ("PEFRM_DRY_RUN", "0"),
                ("PEFRM_DRY_RUN_ARCH", "vax"),
            ]),
        );
        assert_eq!(config.image_path, PathBuf::from("fixed.exe"));
        assert_eq!(config.log_level, LevelFilter::Info);
        assert!(!config.dry_run);
        assert_eq!(config.dry_run_machine, HOST_MACHINE);
    }
}
