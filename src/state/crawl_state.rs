/// Crawl state definitions for the orchestrator state machine
///
/// Every state change the orchestrator makes goes through
/// [`CrawlState::can_transition_to`], so an illegal move surfaces as an error
/// instead of silently corrupting the run.
use std::fmt;

/// Represents the current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// Loading the checkpoint and zeroing run counters
    Init,

    /// Gating on quota and processing one page at a time
    Paging,

    /// Suspended until the provider's quota window resets
    Throttled,

    /// Source exhausted or stop requested; flushing partial batches
    Draining,

    /// Terminal success
    Done,

    /// Terminal failure; the last saved checkpoint is the resume point
    Failed,
}

impl CrawlState {
    /// Returns true if no further work happens in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// `Done`/`Failed` may only move back to `Init`, which models an operator
    /// restarting the crawl from the last durable checkpoint.
    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        use CrawlState::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Init, Paging)
                | (Paging, Paging)
                | (Paging, Throttled)
                | (Paging, Draining)
                | (Throttled, Paging)
                | (Throttled, Draining)
                | (Draining, Done)
                | (Done, Init)
                | (Failed, Init)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Paging => "paging",
            Self::Throttled => "throttled",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
