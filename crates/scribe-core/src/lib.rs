pub mod errors;
pub mod ids;
pub mod job;
pub mod retry;
pub mod transcript;

pub use errors::JobError;
pub use ids::JobId;
pub use job::{Job, JobStatus, OutputFormat, ProgressInfo, Task, TranscriptionParams, WhisperModel};
pub use transcript::{Segment, SegmentedResult};
