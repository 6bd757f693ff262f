//! CLI command implementations

mod config;
mod connect;
mod serve;

pub use config::{config_init, config_path, config_show, default_config_template, load_settings};
pub use connect::connect_command;
pub use serve::serve_command;
