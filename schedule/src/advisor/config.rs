//! Advisor configuration: the machine model and the driver flags.
//!
//! Both support explicit construction with builders and environment
//! variable fallbacks, so schedules can be tuned without recompiling.

use bon::bon;

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// The two-level memory model the partitioner scores options against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineParams {
    /// Cores that must stay busy; options with fewer tiles than this are
    /// rejected outright.
    pub parallelism: i64,
    /// Native vector width, in elements.
    pub vec_len: i64,
    /// Fast (cache) memory capacity in bytes.
    pub fast_mem_size: i64,
    /// Footprint threshold in bytes below which inlining is considered
    /// free of capacity concerns.
    pub inline_size: i64,
    /// Relative cost of a slow-memory load vs. a fast-memory load, applied
    /// to fast-mem grouping decisions.
    pub balance_fast_mem: i64,
    /// Same ratio applied during the inline phase.
    pub balance_inline: i64,
}

impl Default for MachineParams {
    fn default() -> Self {
        Self {
            parallelism: 8,
            vec_len: 8,
            fast_mem_size: 32 * 1024 * 8,
            inline_size: 32 * 4,
            balance_fast_mem: 10,
            balance_inline: 4,
        }
    }
}

#[bon]
impl MachineParams {
    /// Build a machine model, with the defaults of a small multicore CPU
    /// with a 256K fast level.
    #[builder]
    pub fn new(
        #[builder(default = 8)] parallelism: i64,
        #[builder(default = 8)] vec_len: i64,
        #[builder(default = 32 * 1024 * 8)] fast_mem_size: i64,
        #[builder(default = 32 * 4)] inline_size: i64,
        #[builder(default = 10)] balance_fast_mem: i64,
        #[builder(default = 4)] balance_inline: i64,
    ) -> Self {
        Self { parallelism, vec_len, fast_mem_size, inline_size, balance_fast_mem, balance_inline }
    }

    /// Read the machine model from the environment.
    ///
    /// # Environment Variables
    ///
    /// * `HL_AUTO_PARALLELISM` - cores to fill (fallback: `HL_NUM_THREADS`)
    /// * `HL_AUTO_VEC_LEN` - vector width in elements
    /// * `HL_AUTO_FAST_MEM_SIZE` - fast memory capacity in bytes
    /// * `HL_AUTO_BALANCE` - slow/fast load cost ratio
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parallelism = env_i64("HL_AUTO_PARALLELISM")
            .or_else(|| env_i64("HL_NUM_THREADS"))
            .unwrap_or(defaults.parallelism);
        let vec_len = env_i64("HL_AUTO_VEC_LEN").unwrap_or(defaults.vec_len);
        let fast_mem_size = env_i64("HL_AUTO_FAST_MEM_SIZE").unwrap_or(defaults.fast_mem_size);
        let balance_fast_mem = env_i64("HL_AUTO_BALANCE").unwrap_or(defaults.balance_fast_mem);
        Self { parallelism, vec_len, fast_mem_size, balance_fast_mem, ..defaults }
    }
}

/// Driver flags for the advisor entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvisorFlags {
    /// Schedule everything compute_root and stop; a baseline, not a tuner.
    pub naive: bool,
    /// Tag the parallel loops the emitter marks with a GPU device API;
    /// loops inside them inherit the tag during lowering.
    pub gpu: bool,
    /// Sweep mode: log every option the partitioner evaluates, including
    /// the ones rejected before scoring, not just the accepted merges.
    pub sweep: bool,
    /// Break benefit ties randomly instead of first-wins (reserved; the
    /// default deterministic order is what the tests rely on).
    pub random: bool,
}

#[bon]
impl AdvisorFlags {
    #[builder]
    pub fn new(
        #[builder(default = false)] naive: bool,
        #[builder(default = false)] gpu: bool,
        #[builder(default = false)] sweep: bool,
        #[builder(default = false)] random: bool,
    ) -> Self {
        Self { naive, gpu, sweep, random }
    }

    /// Read the flags from the environment.
    ///
    /// # Environment Variables
    ///
    /// * `HL_AUTO_NAIVE` - compute_root everything
    /// * `HL_AUTO_GPU` - tag emitted parallel loops for the GPU
    /// * `HL_AUTO_SWEEP` - log every option, rejected ones included
    /// * `HL_AUTO_RAND` - randomized tie-breaks
    pub fn from_env() -> Self {
        Self {
            naive: std::env::var("HL_AUTO_NAIVE").is_ok(),
            gpu: std::env::var("HL_AUTO_GPU").is_ok(),
            sweep: std::env::var("HL_AUTO_SWEEP").is_ok(),
            random: std::env::var("HL_AUTO_RAND").is_ok(),
        }
    }
}
