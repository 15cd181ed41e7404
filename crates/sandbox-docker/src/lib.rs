mod config;
mod container;
mod factory;
mod sandbox;

pub use config::DockerConfig;
pub use factory::DockerFactory;
pub use sandbox::DockerSandbox;
