//! Command-line surface: flags describe one connection, the subcommand
//! picks the operation to run against it.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "transfer-cli", version, about = "Drive the file-transfer engine over HTTP, FTP, or the custom TCP protocol")]
pub struct Args {
    /// Transport to connect over.
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// FTP username (ftp transport only).
    #[arg(long)]
    pub username: Option<String>,

    /// FTP password (ftp transport only).
    #[arg(long)]
    pub password: Option<String>,

    /// Disable FTP passive mode.
    #[arg(long, default_value_t = false)]
    pub ftp_active: bool,

    /// Use FTPS instead of plain FTP (ftp transport only).
    #[arg(long, default_value_t = false)]
    pub ftp_secure: bool,

    /// Use https:// instead of http:// (http transport only).
    #[arg(long, default_value_t = false)]
    pub https: bool,

    /// Load host/port/credentials from a saved TOML profile. Flags above
    /// fill in anything the profile omits.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportArg {
    Http,
    Ftp,
    Tcp,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and report whether the round trip succeeded.
    Test,
    /// List files at a remote directory.
    List { path: String },
    /// Fetch metadata for a single remote file.
    Info { path: String },
    /// Download a remote file to a local path, reporting progress.
    Download { remote_path: String, local_path: PathBuf },
    /// Upload a local file to a remote path, reporting progress.
    Upload { local_path: PathBuf, remote_path: String },
    /// Delete a remote file.
    Delete { path: String },
    /// Rename or move a remote file.
    Rename { old_path: String, new_path: String },
    /// Create a remote directory.
    Mkdir { path: String },
}
