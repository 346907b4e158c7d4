//! # Loader Configuration
//!
//! Switches for the optional parts of a load. The defaults reproduce what
//! the OS loader does for a plain executable: bookkeeping is patched and the
//! unwind table is registered, sections stay RWX.

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Apply per-section protections before entry
    pub apply_section_protection: bool,
    /// Point the process image-base record and head module entry at the image
    pub patch_bookkeeping: bool,
    /// Register the exception directory with the host
    pub register_unwind_table: bool,
    /// Reject relocation kinds the image's architecture cannot carry
    pub strict_relocations: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            apply_section_protection: false,
            patch_bookkeeping: true,
            register_unwind_table: true,
            strict_relocations: true,
        }
    }
}

impl LoaderConfig {
    /// Enables per-section protection and returns self.
    pub fn with_section_protection(mut self) -> Self {
        self.apply_section_protection = true;
        self
    }

    /// Disables loader bookkeeping patching and returns self.
    pub fn without_bookkeeping(mut self) -> Self {
        self.patch_bookkeeping = false;
        self
    }

    /// Disables unwind table registration and returns self.
    pub fn without_unwind_table(mut self) -> Self {
        self.register_unwind_table = false;
        self
    }

    /// Accept every known relocation kind regardless of architecture.
    pub fn lenient_relocations(mut self) -> Self {
        self.strict_relocations = false;
        self
    }

    /// Create config from a space-separated option string
    ///
    /// Recognised options: `protect`, `nobookkeeping`, `nounwind`,
    /// `lenient_relocs`. Unknown words are ignored.
    pub fn from_options(options: &str) -> Self {
        let mut config = Self::default();

        for option in options.split_whitespace() {
            match option {
                "protect" => config = config.with_section_protection(),
                "nobookkeeping" => config = config.without_bookkeeping(),
                "nounwind" => config = config.without_unwind_table(),
                "lenient_relocs" => config = config.lenient_relocations(),
                other => log::warn!("ignoring unknown loader option '{}'", other),
            }
        }

        config
    }
}
