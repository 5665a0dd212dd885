//! Per-CPU random streams.
//!
//! Victim searches only need cheap, well-spread choices, not
//! cryptographic quality. Each CPU keeps one 64-bit xorshift state.

/// Multiplier used to derive per-CPU streams from a base seed
const STREAM_MUL: u64 = 6364136223846793005;

/// xorshift64 generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    /// Create a generator from a raw state
    ///
    /// A zero state would lock the generator at zero, so it is replaced by 1.
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Derive the stream for one CPU from a shared base seed
    pub const fn for_cpu(base_seed: u64, cpu: u32) -> Self {
        Self::new((base_seed ^ (cpu as u64 + 1)).wrapping_mul(STREAM_MUL) | 1)
    }

    /// Current raw state, for storing the stream back into a per-CPU slot
    #[inline(always)]
    pub const fn state(&self) -> u64 {
        self.state
    }

    /// Next 64-bit value
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Value in `[0, bound)`; `bound == 0` yields 0
    #[inline]
    pub fn next_bounded(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}
