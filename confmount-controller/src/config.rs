use std::time::Duration;

use confmount_core::DEFAULT_FILE_MODE;

/// Re-attempts per change before a key is dropped.
pub const MAX_RETRIES: u32 = 5;
/// Full resync period of the watcher.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// First rate-limited requeue delay; doubles per failure.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
/// Upper bound of the requeue delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(1000);
/// First delay before reopening a failed change stream; doubles per attempt.
pub const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_millis(200);
/// Upper bound of the delay between resubscribe attempts.
pub const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

/// Tunables of one controller instance.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_retries: u32,
    pub resync_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub resubscribe_base_delay: Duration,
    pub resubscribe_max_delay: Duration,
    pub workers: usize,
    pub file_mode: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            retry_base_delay: RETRY_BASE_DELAY,
            retry_max_delay: RETRY_MAX_DELAY,
            resubscribe_base_delay: RESUBSCRIBE_BASE_DELAY,
            resubscribe_max_delay: RESUBSCRIBE_MAX_DELAY,
            workers: 1,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}
