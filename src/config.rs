use std::time::Duration;

/// default max frame length, 1M
pub const DEFAULT_MAX_FRAME_LEN: u64 = 1024 * 1024;

/// default stack size of a call coroutine, in words
pub const DEFAULT_CALL_STACK_SIZE: usize = 0x4000;

/// Runtime knobs shared by the server and the client.
#[derive(Debug, Clone)]
pub struct Config {
    /// frames longer than this are rejected
    pub max_frame_len: u64,
    /// stack size of the coroutine that runs each call
    pub call_stack_size: usize,
    /// client side receive timeout, `None` waits forever
    pub timeout: Option<Duration>,
    /// worker threads for the `may` scheduler, `None` keeps its default
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
            timeout: None,
            workers: None,
        }
    }
}

impl Config {
    /// set the max frame length
    pub fn max_frame_len(mut self, len: u64) -> Self {
        self.max_frame_len = len;
        self
    }

    /// set the stack size of call coroutines
    pub fn call_stack_size(mut self, size: usize) -> Self {
        self.call_stack_size = size;
        self
    }

    /// set the client receive timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// set the number of scheduler workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Push the scheduler settings into `may`.
    ///
    /// Must run before the first coroutine is spawned to take effect.
    pub fn apply_scheduler(&self) {
        if let Some(workers) = self.workers {
            may::config().set_workers(workers);
        }
    }
}
