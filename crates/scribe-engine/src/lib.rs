//! Job lifecycle for audio transcription.
//!
//! - [`engine`]: the collaborator interface the service delegates inference to
//! - [`sidecar`]: production engine speaking HTTP to a whisper sidecar
//! - [`mock`]: scripted engine for tests
//! - [`format`]: segmented result → JSON / TXT / SRT / VTT
//! - [`lifecycle`]: submission and the background routine driving each job
//! - [`directory`]: list / get / download / delete over stored jobs

pub mod directory;
pub mod engine;
pub mod format;
pub mod lifecycle;
pub mod mock;
pub mod sidecar;

pub use directory::{Artifact, JobDirectory};
pub use engine::{EngineError, EngineRequest, NoProgress, ProgressSink, TranscriptionEngine};
pub use lifecycle::JobManager;
pub use mock::{MockEngine, MockResponse};
pub use sidecar::SidecarEngine;
