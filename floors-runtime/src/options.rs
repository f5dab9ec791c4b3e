use floors::{DEFAULT_PRELOAD_DISTANCE, DEFAULT_SCHEDULE_DELAY_MS, ErrorPolicy};
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::FloorManager`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerOptions {
    /// Load blocks ahead of the viewport.
    pub preloading: bool,
    /// How many blocks past the last visible one are prefetched.
    pub preload_distance: usize,
    pub prefetch_delay_ms: u64,
    /// Pin sticky blocks above the list.
    pub sticky: bool,
    pub error_policy: ErrorPolicy,
    /// Keep block instances around for reuse after removal.
    pub pooling: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            preloading: true,
            preload_distance: DEFAULT_PRELOAD_DISTANCE,
            prefetch_delay_ms: DEFAULT_SCHEDULE_DELAY_MS,
            sticky: true,
            error_policy: ErrorPolicy::default(),
            pooling: false,
        }
    }
}

impl ManagerOptions {
    pub fn with_preloading(mut self, preloading: bool) -> Self {
        self.preloading = preloading;
        self
    }

    pub fn with_preload_distance(mut self, distance: usize) -> Self {
        self.preload_distance = distance;
        self
    }

    pub fn with_prefetch_delay_ms(mut self, delay_ms: u64) -> Self {
        self.prefetch_delay_ms = delay_ms;
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_pooling(mut self, pooling: bool) -> Self {
        self.pooling = pooling;
        self
    }
}

/// Runtime switches for [`crate::FloorManager::configure`].
#[derive(Clone, Debug, PartialEq)]
pub struct FloorFeatures {
    pub preloading: bool,
    pub sticky: bool,
    /// Replaces the handler's strategies and retry policy when set.
    pub error_policy: Option<ErrorPolicy>,
}

impl Default for FloorFeatures {
    fn default() -> Self {
        Self {
            preloading: true,
            sticky: true,
            error_policy: None,
        }
    }
}
