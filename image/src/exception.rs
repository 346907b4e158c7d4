//! x64 exception directory entries.

/// Size of one `RUNTIME_FUNCTION` record in the directory
pub(crate) const RUNTIME_FUNCTION_SIZE: usize = 12;

/// Unwind coverage of one function, all fields RVAs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFunction {
    /// First byte of the function
    pub begin_rva: u32,
    /// One past the last byte
    pub end_rva: u32,
    /// Unwind information record
    pub unwind_info_rva: u32,
}

impl RuntimeFunction {
    /// Parse one little-endian directory record
    pub(crate) fn from_record(record: &[u8; RUNTIME_FUNCTION_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([record[i], record[i + 1], record[i + 2], record[i + 3]]);
        Self {
            begin_rva: word(0),
            end_rva: word(4),
            unwind_info_rva: word(8),
        }
    }
}
