use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qbcli::cache::TokenCache;
use qbcli::{Client, ClientConfig, ConnectionIdentity};

#[derive(Parser)]
#[command(name = "qbcli")]
#[command(about = "Command-line client for the qBittorrent WebUI", long_about = None)]
struct Cli {
    /// WebUI host URL
    #[arg(
        short = 'H',
        long,
        env = "QBCLI_HOST_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    host: String,

    /// WebUI username
    #[arg(short, long, env = "QBCLI_USERNAME")]
    username: Option<String>,

    /// WebUI password
    #[arg(short, long, env = "QBCLI_PASSWORD")]
    password: Option<String>,

    /// Directory for cached session tokens
    #[arg(long, env = "QBCLI_CACHE_DIR")]
    cache: Option<PathBuf>,

    /// Disable the on-disk session cache
    #[arg(long)]
    no_cache: bool,

    /// Authenticate even when a cached session exists
    #[arg(long)]
    auth: bool,

    /// Overall budget per operation in seconds, retries included; 0 disables
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Retry failed requests
    #[arg(long)]
    retry: bool,

    /// Attempts per operation when retrying; 0 means unbounded
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Seconds to wait between attempts when retrying
    #[arg(long, default_value_t = 30)]
    delay: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and cache the session token
    Login,
    /// End the session and drop the cached token
    Logout,
    /// Print the full preferences object as JSON
    GetPreferences,
    /// Apply a partial preferences update from a JSON object
    SetPreferences {
        /// JSON object of preference keys to set
        json: String,
    },
    /// Print the listening port
    GetListeningPort,
    /// Set the listening port
    SetListeningPort {
        /// Port number
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("qbcli={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; canceling");
            guard.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let identity = ConnectionIdentity::from_url(
        &cli.host,
        cli.username.as_deref(),
        cli.password.as_deref(),
    )?;

    let cache = if cli.no_cache {
        None
    } else {
        Some(TokenCache::new(cache_dir(cli.cache)?))
    };

    let (max_attempts, retry_delay) = if cli.retry {
        (cli.max_retries, Duration::from_secs(cli.delay))
    } else {
        (1, Duration::ZERO)
    };
    let config = ClientConfig {
        force_auth: cli.auth,
        timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
        max_attempts,
        retry_delay,
    };

    let mut client = Client::new(identity, cache, config)?;

    match cli.command {
        Commands::Login => {
            let version = client.login(cancel).await?;
            println!("Logged in to qBittorrent {version}");
            if let Some(expiry) = client.session_token().and_then(|t| t.expiry()) {
                println!("Session valid until {}", expiry.to_rfc3339());
            }
        }
        Commands::Logout => {
            client.logout(cancel).await?;
            println!("Logged out");
        }
        Commands::GetPreferences => {
            let prefs = client.preferences(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
        Commands::SetPreferences { json } => {
            let prefs: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&json)?;
            client.set_preferences(&prefs, cancel).await?;
            println!("Preferences updated");
        }
        Commands::GetListeningPort => {
            let port = client.listening_port(cancel).await?;
            println!("{port}");
        }
        Commands::SetListeningPort { port } => {
            client.set_listening_port(port, cancel).await?;
            println!("Listening port set to {port}");
        }
    }

    Ok(())
}

fn cache_dir(flag: Option<PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    dirs::cache_dir()
        .map(|dir| dir.join("qbcli"))
        .ok_or_else(|| "no cache directory available; pass --cache or --no-cache".into())
}
