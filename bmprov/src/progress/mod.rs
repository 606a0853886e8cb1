use async_trait::async_trait;
use bmprov_schemas::inventory::Host;

pub mod markers;
pub mod process;

/// What a progress source said about an install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Progress {
        /// always within 0..=100
        progress: u8,
        message: String,
    },
    Failed {
        message: String,
    },
}

impl PollOutcome {
    pub fn progress(progress: u8, message: &str) -> Self {
        PollOutcome::Progress { progress: progress.min(100), message: message.to_string() }
    }

    pub fn failed(message: &str) -> Self {
        PollOutcome::Failed { message: message.to_string() }
    }
}

/// Asks how far the os install of one host is. Implementations bound the time spent on a single
/// call and report a failed query as `PollOutcome::Failed`, never by hanging.
#[async_trait]
pub trait ProgressPoller: Send + Sync {
    async fn poll(&self, host: &Host) -> PollOutcome;
}

/// Progress of a cluster wide install, polled by a single task so it may keep state between polls
#[async_trait]
pub trait ClusterProgressSource: Send {
    async fn poll(&mut self) -> PollOutcome;
}

/// Last `max` characters of a message, installer output can be long
pub fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_clamps() {
        assert_eq!(PollOutcome::progress(140, "done"), PollOutcome::Progress { progress: 100, message: "done".into() });
        assert_eq!(tail("  abcdef \n", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
