//! # dbot-cli
//!
//! Argument parsing and config loading for the `dbot` binary.

pub mod cli;

pub use cli::{load_config, Cli, Commands};
pub use dbot_slack::SlackConfig;
