//! # Entry Point Invocation
//!
//! The last step of a load: transfer control to `actual_base + entry`.
//! [`NativeEntry`] really jumps there; [`StubEntry`] only records the
//! address, for tests and dry runs.

use crate::error::LoadResult;

/// Transfers control to a prepared image
pub trait EntryInvoker {
    /// Run the entry point at `address`.
    ///
    /// Returns only if the entry point itself returns.
    fn invoke(&mut self, address: u64) -> LoadResult<()>;
}

/// Calls the entry point as a parameterless `extern "system"` function
#[derive(Debug)]
pub struct NativeEntry {
    _private: (),
}

impl NativeEntry {
    /// Create the invoker.
    ///
    /// # Safety
    ///
    /// Every address passed to [`EntryInvoker::invoke`] must be the entry
    /// point of a completely mapped, relocated and bound image in executable
    /// memory. The callee runs with the full rights of this process.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl EntryInvoker for NativeEntry {
    fn invoke(&mut self, address: u64) -> LoadResult<()> {
        log::info!("entering image at {:#x}", address);
        log::logger().flush();

        // SAFETY: `NativeEntry::new` callers vouch that `address` is a
        // prepared entry point with this signature.
        let entry = unsafe { core::mem::transmute::<usize, extern "system" fn()>(address as usize) };
        entry();
        Ok(())
    }
}

/// Records the entry address instead of calling it
#[derive(Debug, Default)]
pub struct StubEntry {
    /// Address of the last invocation
    pub invoked: Option<u64>,
}

impl StubEntry {
    /// Create a stub that has not been invoked
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryInvoker for StubEntry {
    fn invoke(&mut self, address: u64) -> LoadResult<()> {
        log::info!("entry point {:#x} (not executed)", address);
        self.invoked = Some(address);
        Ok(())
    }
}
