use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
    pub timing: TimingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            extra_args: vec![],
            timing: TimingConfig::default(),
        }
    }
}

/// Every wait the harness performs is bounded by one of these knobs; none
/// of them are hardcoded at the call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause before each element resolution, in milliseconds.
    pub settle_delay_ms: u64,
    /// Cadence for readiness and assertion polling.
    pub poll_interval_ms: u64,
    pub navigation_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub assert_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3000,
            poll_interval_ms: 100,
            navigation_timeout_ms: 10000,
            ready_timeout_ms: 3000,
            action_timeout_ms: 5000,
            assert_timeout_ms: 30000,
        }
    }
}

impl TimingConfig {
    /// Near-zero delays for deterministic tests and local fixtures.
    pub fn fast() -> Self {
        Self {
            settle_delay_ms: 0,
            poll_interval_ms: 10,
            navigation_timeout_ms: 1000,
            ready_timeout_ms: 200,
            action_timeout_ms: 500,
            assert_timeout_ms: 2000,
        }
    }
}
