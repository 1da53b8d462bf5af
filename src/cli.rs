//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// dapwire DAP server command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "DAPWIRE_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8001, env = "DAPWIRE_PORT")]
    pub port: u16,
    /// Directory holding the datasets to serve
    #[arg(long, default_value = "~/.local/share/dapwire/data", env = "DAPWIRE_DATA_DIR")]
    pub data_dir: String,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "DAPWIRE_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/dapwire/certs/cert.pem",
        env = "DAPWIRE_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/dapwire/certs/key.pem",
        env = "DAPWIRE_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "DAPWIRE_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
