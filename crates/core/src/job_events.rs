//! Event names carried on job and run event streams.

/// Job admitted and waiting for its task to start.
pub const JOB_QUEUED: &str = "job_queued";

/// Job task started executing.
pub const JOB_STARTED: &str = "job_started";

/// Progress update; payload carries a `step` field.
pub const JOB_PROGRESS: &str = "job_progress";

pub const JOB_COMPLETED: &str = "job_completed";

pub const JOB_FAILED: &str = "job_failed";

/// Job was canceled (by user or system).
pub const JOB_CANCELED: &str = "job_canceled";

/// An agent run invoked a tool (context load, proposal, reindex).
pub const TOOL_CALL: &str = "tool_call";

/// Content about to be written through the file guard.
pub const FILE_WRITE_PREVIEW: &str = "file_write_preview";

/// Content written through the file guard.
pub const FILE_WRITTEN: &str = "file_written";

/// Outcome of structural validation of a proposal.
pub const LINT_RESULT: &str = "lint_result";

pub const RUN_STARTED: &str = "run_started";

pub const RUN_COMPLETED: &str = "run_completed";

pub const RUN_FAILED: &str = "run_failed";

pub const RUN_CANCELED: &str = "run_canceled";

pub const RUN_REVERTED: &str = "run_reverted";

/// Keep-alive sent on live event streams.
pub const HEARTBEAT: &str = "heartbeat";

// Progress step names reported in `job_progress` payloads.

pub const STEP_LOAD_PROMPT: &str = "load_prompt";
pub const STEP_RESOLVE_CONTINUITY: &str = "resolve_continuity";
pub const STEP_COLLECT_REFERENCES: &str = "collect_references";
pub const STEP_PROVIDER_CALL: &str = "provider_call";
pub const STEP_DOWNLOAD_OUTPUT: &str = "download_output";
