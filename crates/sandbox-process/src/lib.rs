mod config;
mod factory;
mod paths;
mod process;
mod sandbox;

pub use config::ProcessConfig;
pub use factory::ProcessFactory;
pub use paths::FactoryPaths;
pub use sandbox::ProcessSandbox;
