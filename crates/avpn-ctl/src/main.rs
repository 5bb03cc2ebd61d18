//! avpn-ctl: tunnel configuration tool
//!
//! Validates WireGuard configuration text, wraps it into the tunnel request
//! payload the controller accepts, manages keys and inspects the persisted
//! last good configuration.

use anyhow::{Context, Result, bail};
use avpn_tunnel::{
    ConfigStore, FileStore, HttpProxy, PrivateKey, Settings, TunnelRequest, decode, serialize,
};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "avpn-ctl", version, about = "avpn tunnel configuration tool")]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, env = "AVPN_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate WireGuard configuration text and print its normalised form
    Check { path: PathBuf },
    /// Wrap WireGuard configuration text into a tunnel request payload
    Wrap {
        path: PathBuf,
        /// Application excluded from the tunnel (repeatable)
        #[arg(long = "exclude")]
        excluded_apps: Vec<String>,
        /// HTTP proxy as host:port
        #[arg(long)]
        proxy: Option<String>,
        #[arg(long)]
        mtu: Option<u16>,
    },
    /// Generate a private key
    Genkey,
    /// Derive the public key of a base64 private key
    Pubkey { private_key: String },
    /// Print the persisted last good configuration
    LastConfig,
    /// Print the effective settings
    Settings,
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_toml_file(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn store_dir(settings: &Settings) -> Result<PathBuf> {
    if let Some(dir) = &settings.store_dir {
        return Ok(dir.clone());
    }
    ProjectDirs::from("org", "avpn", "avpn")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("no home directory to keep state in")
}

fn parse_proxy(s: &str) -> Result<HttpProxy> {
    let Some((host, port)) = s.rsplit_once(':') else {
        bail!("proxy must be host:port, got {s}");
    };
    Ok(HttpProxy {
        host: host.to_string(),
        port: port.parse().with_context(|| format!("invalid proxy port {port}"))?,
    })
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout carries command output
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings = load_settings(cli.settings.as_deref())?;
    debug!("Settings: {:?}", settings);

    match cli.command {
        Command::Check { path } => {
            let config = decode(&read_config(&path)?)
                .with_context(|| format!("{} is not a valid configuration", path.display()))?;
            info!(
                "{}: {} peer(s), {} route(s)",
                path.display(),
                config.peers().len(),
                config.routes().len()
            );
            if let Some(text) = serialize(&config) {
                print!("{text}");
            }
        }
        Command::Wrap {
            path,
            excluded_apps,
            proxy,
            mtu,
        } => {
            let mut request = TunnelRequest::wireguard(read_config(&path)?);
            request.excluded_apps.extend(excluded_apps);
            request.http_proxy = proxy.as_deref().map(parse_proxy).transpose()?;
            request.mtu = mtu;
            // Fail here rather than on the device
            request.resolve(&settings)?;
            println!("{}", request.to_json());
        }
        Command::Genkey => {
            println!("{}", PrivateKey::generate().to_base64());
        }
        Command::Pubkey { private_key } => {
            let key = PrivateKey::from_base64(&private_key).context("invalid private key")?;
            println!("{}", key.public_key());
        }
        Command::LastConfig => {
            let dir = store_dir(&settings)?;
            let store = ConfigStore::new(FileStore::new(&dir));
            match store.load()? {
                Some(request) => println!("{}", request.to_json()),
                None => info!("No saved configuration in {}", dir.display()),
            }
        }
        Command::Settings => {
            print!("{}", settings.to_toml());
        }
    }

    Ok(())
}
