pub mod keytool_signer;
pub mod runner;

pub use keytool_signer::KeytoolSigner;
pub use runner::{ProcessStatus, ProcessToolchain, Toolchain, ToolchainOutput, toolchain_version};
