//! Artifact storage

pub mod artifact_store;

pub use artifact_store::{published_name, ArtifactStore, LocalArtifactStore};
