pub mod paths;
pub mod settings;
pub mod ssh_config;

pub use paths::Paths;
pub use settings::{AppConfig, BackoffSettings, EngineSettings};
pub use ssh_config::{HostEntry, SshConfig, load_ssh_config, parse_ssh_config};
