pub mod build;
pub mod client;
pub mod core;
pub mod lockfile;
pub mod orchestration;
pub mod toolchain;
pub mod validation;

pub use crate::client::RpcNetworkClient;
pub use crate::core::config::{NetworkProfile, PublishStrategy, PublisherConfig};
pub use crate::core::config_loader::{ConfigLoadOptions, ConfigLoader};
pub use crate::core::error::{PublisherError, Result};
pub use crate::core::traits::{NetworkClient, Signer};
pub use crate::orchestration::{
    ArtifactQuery, ArtifactStore, CheckReport, PackagePublisher, PublishArtifact, PublishOptions,
    PublishReport,
};
pub use crate::toolchain::{KeytoolSigner, ProcessToolchain, Toolchain};
