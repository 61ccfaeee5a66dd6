//! Scan pipeline.
//!
//! - **Targets**: load, normalize and de-duplicate the target list
//! - **Runner**: seed the store, run the worker pool, handle Ctrl-C and resume
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parascan::config::ScanConfig;
//! use parascan::pipeline::{load_targets, run_parallel_scan, ScanInput};
//! use parascan::session::HttpProbeFactory;
//!
//! let config = ScanConfig::from_env()?.with_workers(4);
//! let jobs = load_targets("targets.txt".as_ref(), config.prepend_https)?;
//! let outcome = run_parallel_scan(&config, ScanInput::Targets(jobs), Arc::new(HttpProbeFactory::new())).await?;
//! println!("{} of {} targets complete", outcome.counts.complete, outcome.counts.total);
//! ```

pub mod runner;
pub mod targets;

pub use runner::{run_parallel_scan, run_parallel_scan_until, RunOptions, ScanInput, ScanOutcome};
pub use targets::{dedup_jobs, load_targets, normalize_target, parse_targets};
