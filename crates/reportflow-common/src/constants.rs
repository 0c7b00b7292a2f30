//! Common constants used across reportflow

/// Well-known identity of the status monitor mailbox
pub const MONITOR_ID: &str = "monitor";

/// Well-known identity of the orchestrator mailbox
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Identity used by the CLI when submitting jobs
pub const CLIENT_ID: &str = "client";

/// Default mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default number of review rejections tolerated per job
pub const DEFAULT_MAX_FEEDBACK_RETRIES: u32 = 3;

/// Default number of local retries after a stage error
pub const DEFAULT_MAX_ERROR_RETRIES: u32 = 1;

/// Default per-agent state history kept by the monitor
pub const DEFAULT_HISTORY_LIMIT: usize = 32;

/// Default number of finished jobs the orchestrator keeps for status queries
pub const DEFAULT_MAX_FINISHED_JOBS: usize = 256;

/// Default number of outcomes a client holds for jobs nobody is waiting on yet
pub const DEFAULT_MAX_UNCLAIMED_OUTCOMES: usize = 64;

/// Default timeframe for report requests
pub const DEFAULT_TIMEFRAME: &str = "1d";

/// Default timeout values in milliseconds
pub mod timeouts {
    pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
}

/// Stage names of the standard research pipeline
pub mod stages {
    pub const RESEARCH: &str = "research";
    pub const ANALYSIS: &str = "analysis";
    pub const WRITING: &str = "writing";
    pub const REVIEW: &str = "review";
}

/// Metadata keys carried on messages for correlation
pub mod metadata_keys {
    pub const JOB_ID: &str = "job_id";
    pub const STAGE: &str = "stage";
    pub const ATTEMPT: &str = "attempt";
    pub const IN_REPLY_TO: &str = "in_reply_to";
}

/// Values of the `kind` field on orchestrator replies to a job's requester
pub mod reply_kinds {
    /// Terminal result of a job: DONE, FAILED or CANCELLED
    pub const OUTCOME: &str = "outcome";
    /// Point-in-time view answering a status query or a late cancel
    pub const SNAPSHOT: &str = "snapshot";
    /// Confirmation sent to a canceller that is not the requester
    pub const CANCEL_ACK: &str = "cancel_ack";
}
