//! Engine-wide settings.

/// Settings shared by every job an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of each job's progress buffer. When the shell falls behind,
    /// the oldest buffered events are dropped (never the terminal one).
    pub event_buffer: usize,

    /// Consecutive destination write failures after which the job is aborted.
    pub max_consecutive_destination_errors: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            event_buffer: 1024,
            max_consecutive_destination_errors: 5,
        }
    }
}

impl EngineConfig {
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn with_max_consecutive_destination_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_destination_errors = limit.max(1);
        self
    }
}
