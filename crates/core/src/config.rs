use serde::{Deserialize, Serialize};

/// Idle time above which a delay marker separates two groups.
pub const DELAY_THRESHOLD_US: f64 = 50.0;

/// Two equivalent accesses closer than this are treated as duplicates.
pub const DUPLICATE_WINDOW_US: f64 = 1000.0;

/// Copies of one access folded together before a new original starts.
///
/// This comes from the number of PSPs on the largest multi-die parts.
pub const MAX_DUPLICATE_MULTIPLICITY: u32 = 8;

/// Upper bound on originals remembered by the duplicate detector.
pub const DUPLICATE_HISTORY: usize = 200;

/// Reads of exactly this many bytes are tagged `CCP` (crypto co-processor).
pub const CCP_READ_SIZE: u32 = 0x40;

/// Suffix appended to a capture path to locate its cache file.
pub const CACHE_SUFFIX: &str = ".psptrace-cache";

/// Engine tuning constants.
///
/// The defaults are what the CLI runs with; library callers (and tests) can
/// override individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub delay_threshold_us: f64,
    pub duplicate_window_us: f64,
    pub max_duplicate_multiplicity: u32,
    pub duplicate_history: usize,
    /// `None` disables the `CCP` heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccp_read_size: Option<u32>,
    pub cache_suffix: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            delay_threshold_us: DELAY_THRESHOLD_US,
            duplicate_window_us: DUPLICATE_WINDOW_US,
            max_duplicate_multiplicity: MAX_DUPLICATE_MULTIPLICITY,
            duplicate_history: DUPLICATE_HISTORY,
            ccp_read_size: Some(CCP_READ_SIZE),
            cache_suffix: CACHE_SUFFIX.to_string(),
        }
    }
}

impl TraceConfig {
    pub fn with_duplicate_window_us(mut self, window: f64) -> Self {
        self.duplicate_window_us = window;
        self
    }

    pub fn with_delay_threshold_us(mut self, threshold: f64) -> Self {
        self.delay_threshold_us = threshold;
        self
    }
}

/// Per-run view options, as selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewOptions {
    /// Merge consecutive accesses to the same firmware entry.
    pub overview: bool,
    /// Merge consecutive accesses of the same entry type.
    pub collapse: bool,
    /// Hide duplicate accesses from redundant hardware paths.
    pub no_duplicates: bool,
    /// Rebase displayed timestamps on the first access.
    pub normalize_timestamps: bool,
    /// Cap on the number of access records considered.
    pub limit: Option<usize>,
}
