//! Base relocation blocks.

/// One page worth of base relocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationBlock {
    /// Page-aligned RVA the entry offsets are relative to
    pub page_rva: u32,
    /// Entries in directory order
    pub entries: Vec<RelocationEntry>,
}

impl RelocationBlock {
    /// Create an empty block for a page
    pub fn new(page_rva: u32) -> Self {
        Self {
            page_rva,
            entries: Vec::new(),
        }
    }

    /// Append an entry, builder style
    pub fn with_entry(mut self, offset: u16, kind: u16) -> Self {
        self.entries.push(RelocationEntry::new(offset, kind));
        self
    }
}

/// A single fix-up inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    /// Offset within the page (low 12 bits of the raw entry)
    pub offset: u16,
    /// Raw relocation kind (high 4 bits of the raw entry)
    pub kind: u16,
}

impl RelocationEntry {
    /// Padding entry, no fix-up
    pub const ABSOLUTE: u16 = object::pe::IMAGE_REL_BASED_ABSOLUTE;
    /// 32-bit additive fix-up
    pub const HIGHLOW: u16 = object::pe::IMAGE_REL_BASED_HIGHLOW;
    /// 64-bit additive fix-up
    pub const DIR64: u16 = object::pe::IMAGE_REL_BASED_DIR64;

    /// Create an entry
    pub const fn new(offset: u16, kind: u16) -> Self {
        Self { offset, kind }
    }
}

