//! # Windows Host
//!
//! The real backend: memory from `VirtualAlloc`, dependencies through
//! `LoadLibraryA` / `GetProcAddress`, unwind tables through
//! `RtlAddFunctionTable`, and the loader records read and written directly
//! in the process environment block (PEB).
//!
//! ## PEB fields touched
//!
//! ```text
//! PEB ──▶ ImageBaseAddress                       (image-base record)
//!     └─▶ Ldr ──▶ InMemoryOrderModuleList.Flink
//!                  └─▶ LDR_DATA_TABLE_ENTRY.DllBase (head module entry)
//! ```
//!
//! Only one `WindowsHost` may exist per process; the PEB has one writer.

use core::ffi::{c_char, c_void};
use core::ptr::{self, NonNull};
use std::ffi::CString;

use pefrm_image::{Machine, RuntimeFunction};
use static_assertions::const_assert_eq;

use super::{
    Host, LoaderBookkeeping, MemoryManager, ModuleHandle, ModuleResolver, Protection, SymbolRef,
    UnwindRegistry,
};
use crate::arch::HOST_MACHINE;
use crate::context::ImageRegion;
use crate::error::{LoadError, LoadResult};

// ============================================================================
// FFI
// ============================================================================

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;

const PAGE_NOACCESS: u32 = 0x01;
const PAGE_READONLY: u32 = 0x02;
const PAGE_READWRITE: u32 = 0x04;
const PAGE_EXECUTE: u32 = 0x10;
const PAGE_EXECUTE_READ: u32 = 0x20;
const PAGE_EXECUTE_READWRITE: u32 = 0x40;

/// `RUNTIME_FUNCTION` as `RtlAddFunctionTable` reads it
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RuntimeFunctionRecord {
    begin_address: u32,
    end_address: u32,
    unwind_data: u32,
}

#[cfg(target_arch = "x86_64")]
const_assert_eq!(core::mem::size_of::<RuntimeFunctionRecord>(), 12);

/// `LIST_ENTRY`
#[repr(C)]
struct ListEntry {
    flink: *mut ListEntry,
    #[allow(dead_code)]
    blink: *mut ListEntry,
}

const_assert_eq!(core::mem::size_of::<ListEntry>(), 2 * core::mem::size_of::<usize>());

#[link(name = "kernel32")]
extern "system" {
    fn VirtualAlloc(address: *mut c_void, size: usize, allocation_type: u32, protect: u32) -> *mut c_void;
    fn VirtualProtect(address: *mut c_void, size: usize, new_protect: u32, old_protect: *mut u32) -> i32;
    fn LoadLibraryA(file_name: *const c_char) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, proc_name: *const c_char) -> *mut c_void;
    fn GetModuleHandleW(module_name: *const u16) -> *mut c_void;
}

#[cfg(target_arch = "x86_64")]
#[link(name = "kernel32")]
extern "system" {
    fn RtlAddFunctionTable(table: *const RuntimeFunctionRecord, entry_count: u32, base_address: u64) -> u8;
}

// ============================================================================
// PEB LAYOUT
// ============================================================================

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        const PEB_IMAGE_BASE: usize = 0x10;
        const PEB_LDR: usize = 0x18;
        const LDR_IN_MEMORY_ORDER_LIST: usize = 0x20;
        const ENTRY_IN_MEMORY_ORDER_LINKS: usize = 0x10;
        const ENTRY_DLL_BASE: usize = 0x30;

        unsafe fn current_peb() -> *mut u8 {
            let peb: *mut u8;
            // SAFETY: gs:[0x60] holds the PEB pointer for every x64 user thread.
            unsafe {
                core::arch::asm!("mov {}, gs:[0x60]", out(reg) peb, options(nostack, readonly, preserves_flags));
            }
            peb
        }
    } else if #[cfg(target_arch = "x86")] {
        const PEB_IMAGE_BASE: usize = 0x08;
        const PEB_LDR: usize = 0x0C;
        const LDR_IN_MEMORY_ORDER_LIST: usize = 0x14;
        const ENTRY_IN_MEMORY_ORDER_LINKS: usize = 0x08;
        const ENTRY_DLL_BASE: usize = 0x18;

        unsafe fn current_peb() -> *mut u8 {
            let peb: *mut u8;
            // SAFETY: fs:[0x30] holds the PEB pointer for every x86 user thread.
            unsafe {
                core::arch::asm!("mov {}, fs:[0x30]", out(reg) peb, options(nostack, readonly, preserves_flags));
            }
            peb
        }
    } else {
        compile_error!("the Windows host supports x86 and x86_64 only");
    }
}

/// Slot holding the process image-base record
unsafe fn image_base_slot() -> *mut usize {
    // SAFETY: the PEB is mapped for the life of the process.
    unsafe { current_peb().add(PEB_IMAGE_BASE).cast() }
}

/// Slot holding the `DllBase` of the first in-memory-order module entry
unsafe fn head_module_base_slot() -> *mut usize {
    // SAFETY: Ldr and the module list are initialised before any user code runs.
    unsafe {
        let ldr = ptr::read(current_peb().add(PEB_LDR).cast::<*mut u8>());
        let list = ldr.add(LDR_IN_MEMORY_ORDER_LIST).cast::<ListEntry>();
        let first = (*list).flink.cast::<u8>();
        first.sub(ENTRY_IN_MEMORY_ORDER_LINKS).add(ENTRY_DLL_BASE).cast()
    }
}

// ============================================================================
// HOST
// ============================================================================

static HOST_TAKEN: spin::Mutex<bool> = spin::Mutex::new(false);

/// Unwind tables must outlive the process; the OS keeps pointers into them.
#[cfg(target_arch = "x86_64")]
static UNWIND_TABLES: spin::Mutex<Vec<Box<[RuntimeFunctionRecord]>>> = spin::Mutex::new(Vec::new());

/// The current process, as a loading host
#[derive(Debug)]
pub struct WindowsHost {
    _private: (),
}

impl WindowsHost {
    /// Take the process-wide host.
    ///
    /// Returns `None` if it was already taken.
    pub fn acquire() -> Option<Self> {
        let mut taken = HOST_TAKEN.lock();
        if *taken {
            return None;
        }
        *taken = true;
        Some(Self { _private: () })
    }

    /// Base address of the launcher's own image
    pub fn own_image_base(&self) -> u64 {
        // SAFETY: a null name asks for the calling process's image.
        unsafe { GetModuleHandleW(ptr::null()) as usize as u64 }
    }
}

fn page_protection(protection: Protection) -> u32 {
    let read = protection.contains(Protection::READ);
    let write = protection.contains(Protection::WRITE);
    match (protection.contains(Protection::EXECUTE), write, read) {
        (true, true, _) => PAGE_EXECUTE_READWRITE,
        (true, false, true) => PAGE_EXECUTE_READ,
        (true, false, false) => PAGE_EXECUTE,
        (false, true, _) => PAGE_READWRITE,
        (false, false, true) => PAGE_READONLY,
        (false, false, false) => PAGE_NOACCESS,
    }
}

impl MemoryManager for WindowsHost {
    fn reserve(&mut self, size: usize) -> LoadResult<ImageRegion> {
        // SAFETY: plain allocation request, no existing memory involved.
        let memory = unsafe {
            VirtualAlloc(ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE)
        };
        let memory = NonNull::new(memory.cast::<u8>()).ok_or(LoadError::ReservationFailure { size })?;
        // SAFETY: committed, never freed, and owned by nobody else.
        Ok(unsafe { ImageRegion::from_raw(memory, size, 0) })
    }

    fn protect(&mut self, region: &ImageRegion, rva: u32, len: usize, protection: Protection) -> LoadResult<()> {
        let failure = LoadError::ProtectionFailure { rva, len };
        region.slice(rva, len).map_err(|_| failure.clone())?;

        let address = region.address_of(rva) as usize as *mut c_void;
        let mut previous = 0u32;
        // SAFETY: the range was bounds-checked against the region above.
        let ok = unsafe { VirtualProtect(address, len, page_protection(protection), &mut previous) };
        if ok == 0 {
            return Err(failure);
        }
        Ok(())
    }
}

impl ModuleResolver for WindowsHost {
    fn load_module(&mut self, name: &str) -> Option<ModuleHandle> {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let module = unsafe { LoadLibraryA(name.as_ptr()) };
        (!module.is_null()).then(|| ModuleHandle(module as usize as u64))
    }

    fn resolve_symbol(&mut self, module: ModuleHandle, symbol: SymbolRef<'_>) -> Option<u64> {
        let module = module.0 as usize as *mut c_void;
        let address = match symbol {
            SymbolRef::Name(name) => {
                let name = CString::new(name).ok()?;
                // SAFETY: `module` came from LoadLibraryA; `name` is NUL-terminated.
                unsafe { GetProcAddress(module, name.as_ptr()) }
            },
            // SAFETY: ordinals are passed in the low word of the name pointer.
            SymbolRef::Ordinal(ordinal) => unsafe { GetProcAddress(module, usize::from(ordinal) as *const c_char) },
        };
        (!address.is_null()).then(|| address as usize as u64)
    }
}

impl UnwindRegistry for WindowsHost {
    #[cfg(target_arch = "x86_64")]
    fn register(&mut self, table: &[RuntimeFunction], base: u64) -> bool {
        let Ok(count) = u32::try_from(table.len()) else {
            return false;
        };
        let records: Box<[RuntimeFunctionRecord]> = table
            .iter()
            .map(|f| RuntimeFunctionRecord {
                begin_address: f.begin_rva,
                end_address: f.end_rva,
                unwind_data: f.unwind_info_rva,
            })
            .collect();

        // SAFETY: the records are kept alive in UNWIND_TABLES for the rest of the process.
        let ok = unsafe { RtlAddFunctionTable(records.as_ptr(), count, base) } != 0;
        if ok {
            UNWIND_TABLES.lock().push(records);
        }
        ok
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn register(&mut self, _table: &[RuntimeFunction], _base: u64) -> bool {
        false
    }
}

impl LoaderBookkeeping for WindowsHost {
    fn image_base(&self) -> u64 {
        // SAFETY: see `image_base_slot`.
        unsafe { ptr::read(image_base_slot()) as u64 }
    }

    fn set_image_base(&mut self, base: u64) {
        // SAFETY: see `image_base_slot`; this host is the only writer.
        unsafe { ptr::write(image_base_slot(), base as usize) }
    }

    fn head_module_base(&self) -> u64 {
        // SAFETY: see `head_module_base_slot`.
        unsafe { ptr::read(head_module_base_slot()) as u64 }
    }

    fn set_head_module_base(&mut self, base: u64) {
        // SAFETY: see `head_module_base_slot`; this host is the only writer.
        unsafe { ptr::write(head_module_base_slot(), base as usize) }
    }
}

impl Host for WindowsHost {
    fn host_arch(&self) -> Machine {
        HOST_MACHINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_protection_mapping() {
        assert_eq!(page_protection(Protection::RWX), PAGE_EXECUTE_READWRITE);
        assert_eq!(page_protection(Protection::READ | Protection::EXECUTE), PAGE_EXECUTE_READ);
        assert_eq!(page_protection(Protection::READ | Protection::WRITE), PAGE_READWRITE);
        assert_eq!(page_protection(Protection::READ), PAGE_READONLY);
        assert_eq!(page_protection(Protection::empty()), PAGE_NOACCESS);
    }

    #[test]
    fn test_bookkeeping_reads_own_image() {
        let host = WindowsHost { _private: () };
        assert_eq!(host.image_base(), host.own_image_base());
        assert_eq!(host.head_module_base(), host.own_image_base());
    }
}
