//! Orchestration layer for the build & publish pipeline
//!
//! This module provides the planning, extraction and persistence stages
//! and the orchestrator driving them through the pipeline state machine.

pub mod artifact_store;
pub mod extraction;
pub mod package_publisher;
pub mod plan;

// Re-export main types for convenience
pub use artifact_store::{ArtifactQuery, ArtifactStore, PublishArtifact};
pub use extraction::{PublishResult, PublishedPackage};
pub use package_publisher::{CheckReport, PackagePublisher, PublishOptions, PublishReport};
pub use plan::{PublishPlan, UnpublishedMode};
