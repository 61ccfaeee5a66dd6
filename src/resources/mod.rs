//! Host resource introspection.
//!
//! [`ResourceMonitor`] sizes the worker pool from available memory and flags
//! memory pressure during a run; [`has_space`] is the pre-run disk check.

pub mod monitor;

pub use monitor::{
    has_space, DiskSpace, MemoryInfo, ResourceMonitor, SizingLimit, WorkerSizing,
    DEFAULT_MEMORY_LIMIT_PERCENT, MAX_PRACTICAL_WORKERS, MB_PER_WORKER,
};
