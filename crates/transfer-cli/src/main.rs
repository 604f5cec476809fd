mod cli;
mod config;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use transfer_core::service::{build, OperationHooks, OperationResult};
use transfer_types::{ConnectionConfig, FtpDetail, HttpDetail, HttpProtocol, TransportDetail};

use cli::{Args, Command, TransportArg};
use config::Profile;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,transfer_core=info,transfer_cli=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = build_connection_config(&args)?;
    let kind = config.transport_kind();
    let service = build(kind, config.clone());

    service
        .connect(&config)
        .await
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;

    let result = run_command(service.as_ref(), args.command).await;

    service.disconnect().await;
    result
}

async fn run_command(
    service: &dyn transfer_core::service::ConnectionService,
    command: Command,
) -> Result<()> {
    match command {
        Command::Test => {
            println!("connection ok");
        }
        Command::List { path } => {
            let files = service.list_files(&path).await?;
            print_json(&files)?;
        }
        Command::Info { path } => {
            let info = service.get_file_info(&path).await?;
            print_json(&info)?;
        }
        Command::Download { remote_path, local_path } => {
            let hooks = progress_hooks();
            let result = service
                .download_file_to_path(&remote_path, &path_to_str(&local_path)?, hooks)
                .await?;
            print_result(&result);
        }
        Command::Upload { local_path, remote_path } => {
            let hooks = progress_hooks();
            let result = service
                .upload_file(&path_to_str(&local_path)?, &remote_path, hooks)
                .await?;
            print_result(&result);
        }
        Command::Delete { path } => {
            let result = service.delete_file(&path).await?;
            print_result(&result);
        }
        Command::Rename { old_path, new_path } => {
            let result = service.rename_file(&old_path, &new_path).await?;
            print_result(&result);
        }
        Command::Mkdir { path } => {
            let result = service.create_directory(&path).await?;
            print_result(&result);
        }
    }
    Ok(())
}

fn progress_hooks() -> OperationHooks {
    OperationHooks {
        on_progress: Some(Box::new(|done: u64, total: u64| {
            if total > 0 {
                let pct = (done as f64 / total as f64) * 100.0;
                eprint!("\r{done}/{total} bytes ({pct:.1}%)");
            } else {
                eprint!("\r{done} bytes");
            }
        })),
    }
}

fn print_result(result: &OperationResult) {
    eprintln!();
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("failed: {}", result.message);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn path_to_str(path: &PathBuf) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("path {:?} is not valid UTF-8", path))
}

fn build_connection_config(args: &Args) -> Result<ConnectionConfig> {
    let profile = match &args.profile {
        Some(path) => Some(Profile::load(path)?),
        None => None,
    };
    let profile = profile.unwrap_or_default();

    let transport = args
        .transport
        .or_else(|| profile.transport.as_deref().and_then(parse_transport))
        .ok_or_else(|| anyhow!("--transport is required (or set it in the profile)"))?;

    let host = args
        .host
        .clone()
        .or(profile.host.clone())
        .ok_or_else(|| anyhow!("--host is required (or set it in the profile)"))?;

    let port = args
        .port
        .or(profile.port)
        .ok_or_else(|| anyhow!("--port is required (or set it in the profile)"))?;

    let timeout_ms = if args.timeout_ms != 30_000 {
        args.timeout_ms
    } else {
        profile.timeout_ms.unwrap_or(args.timeout_ms)
    };

    let detail = match transport {
        TransportArg::Http => {
            let https = args.https || profile.https.unwrap_or(false);
            TransportDetail::Http(HttpDetail {
                protocol: Some(if https { HttpProtocol::Https } else { HttpProtocol::Http }),
                headers: Default::default(),
            })
        }
        TransportArg::Ftp => {
            let username = args
                .username
                .clone()
                .or(profile.username.clone())
                .ok_or_else(|| anyhow!("--username is required for the ftp transport"))?;
            let password = args
                .password
                .clone()
                .or(profile.password.clone())
                .ok_or_else(|| anyhow!("--password is required for the ftp transport"))?;
            let passive = if args.ftp_active { false } else { profile.passive.unwrap_or(true) };
            let secure = args.ftp_secure || profile.secure.unwrap_or(false);
            TransportDetail::Ftp(FtpDetail { username, password, passive, secure })
        }
        TransportArg::Tcp => TransportDetail::Tcp,
    };

    Ok(ConnectionConfig { host, port, timeout_ms, detail })
}

fn parse_transport(raw: &str) -> Option<TransportArg> {
    match raw.to_ascii_lowercase().as_str() {
        "http" => Some(TransportArg::Http),
        "ftp" => Some(TransportArg::Ftp),
        "tcp" => Some(TransportArg::Tcp),
        _ => None,
    }
}
