//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const UPLOAD_DIR_NAME: &str = "upload";
pub const OTHERS_FOLDER: &str = "others";
pub const UPLOAD_FIELD_NAME: &str = "file";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const MULTIPART_OVERHEAD: u64 = 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "sorted-upload", version, about = "Sorted upload server")]
pub struct Args {
    #[arg(
        short = 'r',
        long,
        env = "SORTED_UPLOAD_ROOT",
        default_value = ".",
        help = "Service root; files are stored under <root>/upload"
    )]
    pub root: String,
    #[arg(
        short = 'b',
        long,
        env = "SORTED_UPLOAD_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT, help = "HTTP port")]
    pub port: u16,
    #[arg(
        long,
        env = "SORTED_UPLOAD_MAX_FILE_SIZE",
        default_value_t = DEFAULT_MAX_FILE_SIZE,
        help = "Max size of an uploaded file in bytes"
    )]
    pub max_file_size: u64,
    #[arg(
        long,
        env = "SORTED_UPLOAD_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}
