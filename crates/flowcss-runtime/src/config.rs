#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`EngineConfig`] is a plain struct with defaults and `with_*` builders.
//! [`EngineConfig::from_env`] layers `FLOWCSS_*` environment overrides on top
//! of the defaults:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FLOWCSS_MAX_FRAME_TIME_MS` | `max_frame_time_ms` |
//! | `FLOWCSS_WORKER_COUNT` | `worker_count` |
//! | `FLOWCSS_ENABLE_GPU` | `enable_gpu` (`1` or `true`) |
//! | `FLOWCSS_CACHE_SIZE` | `cache_size` |
//! | `FLOWCSS_CACHE_TTL_MS` | `cache_ttl_ms` |
//!
//! Unparsable values are ignored. Out-of-range values are clamped by
//! [`EngineConfig::sanitized`].

use std::env;

/// Default per-frame time budget.
pub const DEFAULT_MAX_FRAME_TIME_MS: f64 = 16.0;
/// Worker count used when the host does not report its concurrency.
pub const FALLBACK_WORKER_COUNT: usize = 4;
pub const DEFAULT_CACHE_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_THRESHOLD: u32 = 100;
pub const DEFAULT_CHUNK_COST_MS: f64 = 2.0;

/// Configuration for a [`FlowEngine`](crate::FlowEngine).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Time budget for one frame of scheduled work, in milliseconds.
    /// Default: 16.0.
    pub max_frame_time_ms: f64,

    /// Size of the evaluation worker pool. Accepted but inert: all
    /// evaluation runs on the caller's thread.
    /// Default: host-reported CPU count, or 4.
    pub worker_count: usize,

    /// Offload evaluation to the GPU. Accepted but inert.
    /// Default: false.
    pub enable_gpu: bool,

    /// Maximum number of cached results.
    /// Default: 1000.
    pub cache_size: usize,

    /// Lifetime of cached results. `None` keeps them until evicted.
    /// Default: None.
    pub cache_ttl_ms: Option<f64>,

    /// Expressions more complex than this are split into chunks.
    /// Default: 100.
    pub chunk_threshold: u32,

    /// Estimated cost of one chunk, in milliseconds.
    /// Default: 2.0.
    pub chunk_cost_ms: f64,

    /// Priority given to tasks created by `flow`.
    /// Default: 1.
    pub flow_priority: i32,

    /// Initial `viewportWidth` / `viewportHeight`.
    /// Default: (1024.0, 768.0).
    pub viewport: (f64, f64),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frame_time_ms: DEFAULT_MAX_FRAME_TIME_MS,
            worker_count: default_worker_count(),
            enable_gpu: false,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl_ms: None,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_cost_ms: DEFAULT_CHUNK_COST_MS,
            flow_priority: 1,
            viewport: (1024.0, 768.0),
        }
    }
}

fn default_worker_count() -> usize {
    match num_cpus::get() {
        0 => FALLBACK_WORKER_COUNT,
        n => n,
    }
}

impl EngineConfig {
    /// Defaults with `FLOWCSS_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("FLOWCSS_MAX_FRAME_TIME_MS")
            && let Ok(ms) = val.trim().parse()
        {
            config.max_frame_time_ms = ms;
        }
        if let Some(val) = lookup("FLOWCSS_WORKER_COUNT")
            && let Ok(n) = val.trim().parse()
        {
            config.worker_count = n;
        }
        if let Some(val) = lookup("FLOWCSS_ENABLE_GPU") {
            match val.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => config.enable_gpu = true,
                "0" | "false" => config.enable_gpu = false,
                _ => {}
            }
        }
        if let Some(val) = lookup("FLOWCSS_CACHE_SIZE")
            && let Ok(n) = val.trim().parse()
        {
            config.cache_size = n;
        }
        if let Some(val) = lookup("FLOWCSS_CACHE_TTL_MS")
            && let Ok(ms) = val.trim().parse()
        {
            config.cache_ttl_ms = Some(ms);
        }

        config.sanitized()
    }

    /// Clamp out-of-range values: a non-positive or NaN frame budget falls
    /// back to the default, counts are at least 1, and a non-positive TTL
    /// disables expiry.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.max_frame_time_ms.is_nan() || self.max_frame_time_ms <= 0.0 {
            self.max_frame_time_ms = DEFAULT_MAX_FRAME_TIME_MS;
        }
        self.worker_count = self.worker_count.max(1);
        self.cache_size = self.cache_size.max(1);
        if self.cache_ttl_ms.is_some_and(|ttl| ttl.is_nan() || ttl <= 0.0) {
            self.cache_ttl_ms = None;
        }
        if self.chunk_cost_ms.is_nan() || self.chunk_cost_ms < 0.0 {
            self.chunk_cost_ms = DEFAULT_CHUNK_COST_MS;
        }
        self
    }

    #[must_use]
    pub fn with_max_frame_time_ms(mut self, ms: f64) -> Self {
        self.max_frame_time_ms = ms;
        self
    }

    #[must_use]
    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    #[must_use]
    pub fn with_gpu(mut self, enabled: bool) -> Self {
        self.enable_gpu = enabled;
        self
    }

    #[must_use]
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    #[must_use]
    pub fn with_cache_ttl_ms(mut self, ttl: Option<f64>) -> Self {
        self.cache_ttl_ms = ttl;
        self
    }

    #[must_use]
    pub fn with_chunk_threshold(mut self, threshold: u32) -> Self {
        self.chunk_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_flow_priority(mut self, priority: i32) -> Self {
        self.flow_priority = priority;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, width: f64, height: f64) -> Self {
        self.viewport = (width, height);
        self
    }

    /// Whether any option asks for a backend that does not exist.
    #[must_use]
    pub fn requests_inert_backend(&self) -> bool {
        self.worker_count > 1 || self.enable_gpu
    }
}
