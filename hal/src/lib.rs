//! # LAVD Hook-Environment Layer
//!
//! Primitives shared by every scheduling hook body. Hook bodies run inside
//! the kernel's own scheduling decision on some CPU: they must complete in a
//! bounded number of steps, must never block, and must never allocate.
//! Everything in this crate respects those rules.
//!
//! ## Components
//!
//! - **CPU masks**: fixed-width bitsets over `MAX_CPUS` CPU ids
//! - **Randomized traversal**: lazy draw-without-replacement over a mask
//! - **Per-CPU randomness**: a small xorshift stream per CPU
//! - **Time**: the monotonic clock seam and time-slice sentinels

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cpumask;
pub mod random;
pub mod time;

pub use cpumask::{CpuId, CpuMask, CpuMaskIter, Shuffle, MASK_WORDS};
pub use random::Xorshift64;
pub use time::{Clock, ManualClock, SLICE_INF, SLICE_MIN};

// =============================================================================
// SMP Constants
// =============================================================================

/// Maximum number of supported CPUs
pub const MAX_CPUS: usize = 256;

/// Cache line size used to pad per-CPU records
pub const CACHE_LINE_SIZE: usize = 64;
