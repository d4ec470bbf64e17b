//! Windows-specific type wrappers

pub mod handle;
pub mod memory_info;

pub use handle::ProcessHandle;
pub use memory_info::MemoryBasicInfo;
