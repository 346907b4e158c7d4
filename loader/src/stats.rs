//! Per-load statistics.

use core::fmt;

/// Counters collected while an image is loaded
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    /// Sections copied into the region
    pub sections_mapped: usize,
    /// Payload bytes copied
    pub bytes_copied: usize,
    /// Tail bytes explicitly zeroed
    pub bytes_zeroed: usize,

    /// Relocation entries visited
    pub relocations_total: usize,
    /// Fix-ups written
    pub relocations_applied: usize,
    /// Entries that needed no write (absolute padding)
    pub relocations_skipped: usize,
    /// HIGHLOW fix-ups
    pub highlow: usize,
    /// DIR64 fix-ups
    pub dir64: usize,

    /// Modules bound through the import directory
    pub modules_bound: usize,
    /// Functions bound through the import directory
    pub functions_bound: usize,
    /// Modules bound through the delay-import directory
    pub delay_modules_bound: usize,
    /// Functions bound through the delay-import directory
    pub delay_functions_bound: usize,

    /// Runtime functions handed to the unwind registry
    pub unwind_entries: usize,
    /// Sections whose protection was changed
    pub sections_protected: usize,
}

impl LoadStats {
    /// Creates a new `LoadStats` with all counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Load Statistics:")?;
        writeln!(f, "  Sections mapped:   {}", self.sections_mapped)?;
        writeln!(f, "  Bytes copied:      {}", self.bytes_copied)?;
        writeln!(f, "  Bytes zeroed:      {}", self.bytes_zeroed)?;
        writeln!(
            f,
            "  Relocations:       {} ({} applied, {} skipped)",
            self.relocations_total, self.relocations_applied, self.relocations_skipped
        )?;
        writeln!(f, "    HIGHLOW/DIR64:   {}/{}", self.highlow, self.dir64)?;
        writeln!(
            f,
            "  Imports:           {} modules, {} functions",
            self.modules_bound, self.functions_bound
        )?;
        writeln!(
            f,
            "  Delay imports:     {} modules, {} functions",
            self.delay_modules_bound, self.delay_functions_bound
        )?;
        writeln!(f, "  Unwind entries:    {}", self.unwind_entries)?;
        write!(f, "  Protected:         {}", self.sections_protected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_display() {
        let stats = LoadStats {
            sections_mapped: 4,
            relocations_total: 12,
            relocations_applied: 10,
            relocations_skipped: 2,
            dir64: 10,
            modules_bound: 2,
            functions_bound: 6,
            ..Default::default()
        };
        let display = format!("{}", stats);
        assert!(display.contains("Sections mapped:   4"));
        assert!(display.contains("12 (10 applied, 2 skipped)"));
        assert!(display.contains("HIGHLOW/DIR64:   0/10"));
        assert!(display.contains("2 modules, 6 functions"));
    }
}
