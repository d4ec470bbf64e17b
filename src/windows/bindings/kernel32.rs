//! Kernel32.dll bindings for process and memory operations

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::windows::types::MemoryBasicInfo;
use std::{mem, ptr};
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPVOID};
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_INVALID_ADDRESS, ERROR_INVALID_HANDLE, ERROR_NOACCESS,
    ERROR_PARTIAL_COPY,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::CloseHandle;
use winapi::um::memoryapi::{
    ReadProcessMemory, VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, VirtualQueryEx,
    WriteProcessMemory,
};
use winapi::um::minwinbase::STILL_ACTIVE;
use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
use winapi::um::winnt::{HANDLE, MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE};
use winapi::um::wow64apiset::IsWow64Process;

/// Map the calling thread's last OS error onto the crate taxonomy
fn last_error(address: Address, operation: &str) -> MemoryError {
    // SAFETY: GetLastError has no preconditions
    let code = unsafe { GetLastError() };
    match code {
        ERROR_ACCESS_DENIED => {
            MemoryError::access_denied(address, format!("{} returned error {}", operation, code))
        }
        ERROR_INVALID_HANDLE => MemoryError::InvalidHandle(format!("{} at {}", operation, address)),
        ERROR_INVALID_ADDRESS | ERROR_NOACCESS | ERROR_PARTIAL_COPY => {
            MemoryError::invalid_address(address, format!("{} returned error {}", operation, code))
        }
        _ => MemoryError::invalid_address(address, format!("{} failed with error {}", operation, code)),
    }
}

/// Safe wrapper for OpenProcess
pub fn open_process(pid: u32, desired_access: u32) -> MemoryResult<HANDLE> {
    // SAFETY: OpenProcess only reads its scalar arguments
    let handle = unsafe { OpenProcess(desired_access, FALSE, pid) };
    if handle.is_null() {
        Err(MemoryError::ProcessNotFound(format!("PID: {}", pid)))
    } else {
        Ok(handle)
    }
}

/// Safe wrapper for CloseHandle
///
/// # Safety
/// The handle must be a valid Windows handle that is not used afterwards
pub unsafe fn close_handle(handle: HANDLE) -> MemoryResult<()> {
    if handle.is_null() {
        return Ok(());
    }

    if CloseHandle(handle) == FALSE {
        Err(MemoryError::InvalidHandle("CloseHandle failed".to_string()))
    } else {
        Ok(())
    }
}

/// Safe wrapper for ReadProcessMemory, returning the number of bytes copied
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_READ access
pub unsafe fn read_process_memory(
    handle: HANDLE,
    address: Address,
    buffer: &mut [u8],
) -> MemoryResult<usize> {
    let mut bytes_read = 0;

    let result = ReadProcessMemory(
        handle,
        address.as_usize() as LPVOID,
        buffer.as_mut_ptr() as LPVOID,
        buffer.len(),
        &mut bytes_read,
    );

    if result == FALSE {
        Err(last_error(address, "ReadProcessMemory"))
    } else {
        Ok(bytes_read)
    }
}

/// Safe wrapper for WriteProcessMemory, returning the number of bytes written
///
/// A partial copy is reported as a count, not an error, so that callers
/// can surface it as a partial write.
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_WRITE access
pub unsafe fn write_process_memory(
    handle: HANDLE,
    address: Address,
    data: &[u8],
) -> MemoryResult<usize> {
    let mut bytes_written = 0;

    let result = WriteProcessMemory(
        handle,
        address.as_usize() as LPVOID,
        data.as_ptr() as LPVOID,
        data.len(),
        &mut bytes_written,
    );

    if result == FALSE && (bytes_written == 0 || GetLastError() != ERROR_PARTIAL_COPY) {
        Err(last_error(address, "WriteProcessMemory"))
    } else {
        Ok(bytes_written)
    }
}

/// Safe wrapper for VirtualAllocEx with MEM_COMMIT | MEM_RESERVE
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION access
pub unsafe fn virtual_alloc_ex(handle: HANDLE, size: usize, protection: u32) -> MemoryResult<Address> {
    let base = VirtualAllocEx(
        handle,
        ptr::null_mut(),
        size,
        MEM_COMMIT | MEM_RESERVE,
        protection,
    );

    if base.is_null() {
        Err(MemoryError::allocation(
            size,
            format!("VirtualAllocEx failed with error {}", GetLastError()),
        ))
    } else {
        Ok(Address::new(base as usize))
    }
}

/// Safe wrapper for VirtualFreeEx with MEM_RELEASE
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION access
pub unsafe fn virtual_free_ex(handle: HANDLE, address: Address) -> MemoryResult<()> {
    if VirtualFreeEx(handle, address.as_usize() as LPVOID, 0, MEM_RELEASE) == FALSE {
        Err(last_error(address, "VirtualFreeEx"))
    } else {
        Ok(())
    }
}

/// Safe wrapper for VirtualProtectEx, returning the previous protection
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION access
pub unsafe fn virtual_protect_ex(
    handle: HANDLE,
    address: Address,
    size: usize,
    protection: u32,
) -> MemoryResult<u32> {
    let mut previous: DWORD = 0;

    let result = VirtualProtectEx(
        handle,
        address.as_usize() as LPVOID,
        size,
        protection,
        &mut previous,
    );

    if result == FALSE {
        Err(MemoryError::ProtectionError(format!(
            "VirtualProtectEx failed at {} with error {}",
            address,
            GetLastError()
        )))
    } else {
        Ok(previous)
    }
}

/// Safe wrapper for VirtualQueryEx
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_INFORMATION access
pub unsafe fn virtual_query_ex(handle: HANDLE, address: Address) -> MemoryResult<MemoryBasicInfo> {
    let mut mbi: MEMORY_BASIC_INFORMATION = mem::zeroed();

    let result = VirtualQueryEx(
        handle,
        address.as_usize() as LPVOID,
        &mut mbi,
        mem::size_of::<MEMORY_BASIC_INFORMATION>(),
    );

    if result == 0 {
        Err(last_error(address, "VirtualQueryEx"))
    } else {
        Ok(MemoryBasicInfo::from(mbi))
    }
}

/// Whether the process behind `handle` has not exited yet
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_INFORMATION access
pub unsafe fn is_process_running(handle: HANDLE) -> bool {
    let mut code: DWORD = 0;
    GetExitCodeProcess(handle, &mut code) != FALSE && code == STILL_ACTIVE
}

/// Whether the process runs under WOW64 (32-bit on a 64-bit OS)
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_INFORMATION access
pub unsafe fn is_wow64_process(handle: HANDLE) -> MemoryResult<bool> {
    let mut wow64: BOOL = FALSE;
    if IsWow64Process(handle, &mut wow64) == FALSE {
        Err(MemoryError::InvalidHandle(format!(
            "IsWow64Process failed with error {}",
            GetLastError()
        )))
    } else {
        Ok(wow64 != FALSE)
    }
}
