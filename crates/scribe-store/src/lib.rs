pub mod artifacts;
pub mod error;
pub mod fsutil;
pub mod metadata;

pub use artifacts::{ArtifactStore, StagedAudio};
pub use error::StoreError;
pub use metadata::MetadataStore;
