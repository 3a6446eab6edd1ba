//! CLI arguments and server configuration defaults.

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_ROOT_DIR: &str = "/tmp/dirdrop";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 2690;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 16 * 1024 * 1024;
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const UPLOAD_FIELD_NAME: &str = "files";
pub const FAVICON_PATH: &str = "/favicon.ico";
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "dirdrop", version = VERSION_INFO, about = "Directory browse and upload server")]
pub struct Args {
    #[arg(
        short = 'r',
        long,
        env = "DIRDROP_ROOT_DIR",
        default_value = DEFAULT_ROOT_DIR,
        help = "Root directory to expose"
    )]
    pub root_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "DIRDROP_BIND",
        default_value = DEFAULT_BIND_ADDR,
        help = "IP address to bind"
    )]
    pub bind: String,
    #[arg(
        short = 'p',
        long,
        env = "DIRDROP_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Port number to listen on"
    )]
    pub port: u16,
    #[arg(
        short = 'm',
        long,
        env = "DIRDROP_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max size of an upload request in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(
        long,
        env = "DIRDROP_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        help = "Log output format"
    )]
    pub log_format: LogFormat,
}
