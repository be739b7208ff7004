//! Generation job and continuity orchestration.
//!
//! - [`locks`]: per-resource admission; one active job or run per key.
//! - [`store`]: project file collaborators and their filesystem backing.
//! - [`continuity`] / [`references`]: assemble the inputs of a shot call.
//! - [`executor`]: runs one generation job against an image provider.
//! - [`jobs`]: job lifecycle, event streams and retries.
//! - [`guard`] / [`agent`]: reversible agent edits over project files.

pub mod agent;
pub mod continuity;
pub mod executor;
pub mod guard;
pub mod jobs;
pub mod locks;
pub mod proposer;
pub mod references;
pub mod store;

pub use agent::{AgentRunCoordinator, Run, RunFilter, StartRun, StartedRun};
pub use executor::GenerationExecutor;
pub use guard::{ManifestHandle, RunManifest, TransactionalFileGuard, WriteRecord};
pub use jobs::{CreatedJob, Job, JobFilter, JobManager};
pub use locks::{LockGuard, LockManager};
pub use proposer::{ChatCompletionsProposer, ContentProposer, StaticProposer};
pub use store::{FsProjectStore, ProjectStore, Reindexer};
