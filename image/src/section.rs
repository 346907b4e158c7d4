//! Section records.

use bitflags::bitflags;

bitflags! {
    /// Memory access a section asks for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u32 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Executable
        const EXECUTE = 1 << 2;
    }
}

impl SectionFlags {
    /// Translate `IMAGE_SCN_MEM_*` characteristics
    pub fn from_characteristics(characteristics: u32) -> Self {
        let mut flags = Self::empty();
        if characteristics & object::pe::IMAGE_SCN_MEM_READ != 0 {
            flags |= Self::READ;
        }
        if characteristics & object::pe::IMAGE_SCN_MEM_WRITE != 0 {
            flags |= Self::WRITE;
        }
        if characteristics & object::pe::IMAGE_SCN_MEM_EXECUTE != 0 {
            flags |= Self::EXECUTE;
        }
        flags
    }
}

/// One section of the image
///
/// `data` is the initialised payload; `[data.len(), virtual_size)` is
/// logically zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, NUL padding stripped
    pub name: String,
    /// RVA of the first byte
    pub virtual_address: u32,
    /// Size in memory, never below `data.len()`
    pub virtual_size: u32,
    /// Initialised payload
    pub data: Vec<u8>,
    /// Requested access
    pub flags: SectionFlags,
}

impl Section {
    /// Create a section with no initialised payload
    pub fn new(name: &str, virtual_address: u32, virtual_size: u32, flags: SectionFlags) -> Self {
        Self {
            name: name.into(),
            virtual_address,
            virtual_size,
            data: Vec::new(),
            flags,
        }
    }

    /// Attach a payload, widening the virtual size if it is too small
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.virtual_size = self.virtual_size.max(len);
        self.data = data;
        self
    }

    /// RVA one past the last byte
    pub fn end_rva(&self) -> u64 {
        u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }
}
