//! Process handle that closes itself

use crate::core::types::MemoryResult;
use crate::windows::bindings::kernel32;
use std::fmt;
use winapi::um::winnt::HANDLE;

/// An open process handle together with the pid and rights it was opened with
pub struct ProcessHandle {
    raw: HANDLE,
    pid: u32,
    access: u32,
}

impl ProcessHandle {
    /// Open `pid` requesting the `access` mask
    pub fn open(pid: u32, access: u32) -> MemoryResult<Self> {
        let raw = kernel32::open_process(pid, access)?;
        Ok(ProcessHandle { raw, pid, access })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether every bit of `rights` was requested at open time
    pub fn has_access(&self, rights: u32) -> bool {
        self.access & rights == rights
    }

    /// Raw handle; valid only while `self` is alive
    pub fn raw(&self) -> HANDLE {
        self.raw
    }

    /// False once the process has exited or the handle cannot be queried
    pub fn is_running(&self) -> bool {
        // SAFETY: raw is an open process handle owned by self
        unsafe { kernel32::is_process_running(self.raw) }
    }

    /// Whether the process runs under WOW64 and therefore uses 4-byte pointers
    pub fn is_wow64(&self) -> MemoryResult<bool> {
        // SAFETY: raw is an open process handle owned by self
        unsafe { kernel32::is_wow64_process(self.raw) }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: raw is owned, never handed out for closing, and closed only here
        if let Err(err) = unsafe { kernel32::close_handle(self.raw) } {
            tracing::warn!(pid = self.pid, error = %err, "Failed to close process handle");
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("access", &format_args!("{:#x}", self.access))
            .finish()
    }
}

// SAFETY: a process handle is a kernel object reference usable from any thread
unsafe impl Send for ProcessHandle {}
unsafe impl Sync for ProcessHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_open_current_process() {
        let handle = ProcessHandle::open(std::process::id(), 0x0400 | 0x0010).unwrap();
        assert_eq!(handle.pid(), std::process::id());
        assert!(handle.has_access(0x0010));
        assert!(!handle.has_access(0x0020));
        assert!(handle.is_running());
    }

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_open_missing_process() {
        assert!(ProcessHandle::open(0, 0x0400).is_err());
    }
}
