mod config;
mod error;
mod factory;
mod output;
mod path;
mod sandbox;
mod types;

pub use config::{ResourceLimits, SandboxConfig};
pub use error::{Result, SandboxError};
pub use factory::SandboxFactory;
pub use output::{OutputBuffer, TRUNCATION_MARKER};
pub use path::workspace_path;
pub use sandbox::Sandbox;
pub use types::{ExecRequest, ExecResult, ResourceUsage};
