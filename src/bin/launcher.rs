//! Starts the attendance server, waits until it answers, then opens it in the
//! system browser. Ctrl-C stops the server.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SERVER_BINARY: &str = "orchestra-attendance";
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Parser)]
#[command(name = "launcher")]
#[command(about = "Run the orchestra attendance server and open it in a browser")]
struct Args {
    /// Address the server binds to
    #[arg(long, env = "APP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port the server listens on; anything unparsable falls back to 8000
    #[arg(long, env = "APP_PORT", default_value = "8000")]
    port: String,

    /// Seconds to wait for the server to answer
    #[arg(long, default_value_t = 15.0)]
    timeout: f64,

    /// Server executable; defaults to the one next to this launcher
    #[arg(long)]
    server: Option<PathBuf>,

    /// Start the server without opening a browser
    #[arg(long)]
    no_browser: bool,
}

fn parse_port(raw: &str) -> u16 {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(value = %raw, "APP_PORT is not a valid port, using {}", DEFAULT_PORT);
        DEFAULT_PORT
    })
}

fn server_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let launcher = std::env::current_exe().context("Could not locate the launcher executable")?;
    Ok(launcher.with_file_name(format!(
        "{}{}",
        SERVER_BINARY,
        std::env::consts::EXE_SUFFIX
    )))
}

/// Polls `url` until it answers or the server process exits.
async fn wait_for_server(
    client: &reqwest::Client,
    url: &str,
    server: &mut Child,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut last_error = None;

    while Instant::now() < deadline {
        match server.try_wait() {
            Ok(Some(status)) => {
                warn!(%status, "Server exited before it became ready");
                return false;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not poll server process"),
        }

        match client.get(url).send().await {
            Ok(_) => return true,
            Err(e) => last_error = Some(e),
        }

        sleep(interval).await;
    }

    if let Some(e) = last_error {
        warn!(error = %e, "Server readiness check failed");
    }
    false
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut command = std::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };

    command.arg(url).spawn().map(|_| ())
}

async fn wait_for_exit(server: &mut Child) -> Result<Option<ExitStatus>> {
    tokio::select! {
        status = server.wait() => Ok(Some(status?)),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Could not listen for Ctrl-C")?;
            info!("Stopping server...");
            server.kill().await?;
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let port = parse_port(&args.port);
    let url = format!("http://{}:{}", args.host, port);
    let server = server_path(args.server)?;

    info!(server = %server.display(), "Starting server");
    let mut child = Command::new(&server)
        .arg("serve")
        .env("APP_HOST", &args.host)
        .env("APP_PORT", port.to_string())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Could not start server at {}", server.display()))?;

    info!(pid = ?child.id(), "Waiting for server to be ready...");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let timeout = Duration::from_secs_f64(args.timeout.clamp(0.0, 3600.0));

    if wait_for_server(&client, &url, &mut child, timeout, Duration::from_millis(500)).await {
        info!("Server is running at {}", url);
        if !args.no_browser {
            if let Err(e) = open_browser(&url) {
                warn!(error = %e, "Could not open a browser, visit {} manually", url);
            }
        }
    } else {
        warn!("Server did not answer in time, check its log output");
    }

    match wait_for_exit(&mut child).await? {
        Some(status) if !status.success() => bail!("Server exited with {}", status),
        _ => Ok(()),
    }
}
