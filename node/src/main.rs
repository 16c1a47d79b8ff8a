use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use corral_api::{start_server, AppState};
use corral_registry::NodeRegistry;
use corral_storage::{MemoryStorage, SledStorage, Storage};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
struct AppConfig {
    api_host: String,
    api_port: u16,
    data_dir: String,
    db_path: String,
    memory_backend: bool,
    log_level: String,
    log_format: String,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from("config").join("corral.toml");
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("CORRAL"));

        let config = builder.build()?;

        let data_dir = get_string_value(&config, &["DATA_DIR", "storage.data_dir"])
            .unwrap_or_else(|| "./data".to_string());
        let db_path = get_string_value(&config, &["DB_PATH", "storage.db_path"])
            .unwrap_or_else(|| format!("{data_dir}/db"));

        Ok(Self {
            api_host: get_string_value(&config, &["API_HOST", "api.host"])
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port: get_string_value(&config, &["API_PORT", "api.port"])
                .unwrap_or_else(|| "7070".to_string())
                .parse()
                .context("API_PORT must be a valid port number")?,
            data_dir,
            db_path,
            memory_backend: get_bool_value(&config, &["MEMORY_BACKEND", "storage.memory"], false),
            log_level: get_string_value(&config, &["LOG_LEVEL", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    fn listen_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    fn validate(&self) -> Result<()> {
        if self.api_host.trim().is_empty() {
            anyhow::bail!("API_HOST must not be empty");
        }
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than zero");
        }
        if !self.memory_backend {
            if self.data_dir.trim().is_empty() {
                anyhow::bail!("DATA_DIR must not be empty");
            }
            if self.db_path.trim().is_empty() {
                anyhow::bail!("DB_PATH must not be empty");
            }
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("LOG_FORMAT must be either 'pretty' or 'json'");
        }
        Ok(())
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn build_cli() -> Command {
    Command::new("corral-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Corral cluster node registry")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory"),
        )
        .arg(
            Arg::new("listen-host")
                .long("listen-host")
                .value_name("HOST")
                .help("Override API bind host (defaults to config value)"),
        )
        .arg(
            Arg::new("listen-port")
                .long("listen-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override API port"),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .action(ArgAction::SetTrue)
                .help("Run on the in-memory storage backend (state is lost on exit)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = data_dir.clone();
        config.db_path = format!("{data_dir}/db");
    }

    if let Some(host) = matches.get_one::<String>("listen-host") {
        config.api_host = host.clone();
    }

    if let Some(port) = matches.get_one::<u16>("listen-port") {
        config.api_port = *port;
    }

    if matches.get_flag("memory") {
        config.memory_backend = true;
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr(),
        "starting corral node registry"
    );

    let (storage, backend_name, sled_handle): (Arc<dyn Storage>, &str, Option<Arc<SledStorage>>) =
        if config.memory_backend {
            (Arc::new(MemoryStorage::new()), "memory", None)
        } else {
            std::fs::create_dir_all(&config.data_dir)
                .with_context(|| format!("failed to create data directory {}", config.data_dir))?;
            let sled = Arc::new(
                SledStorage::open(&config.db_path)
                    .with_context(|| format!("failed to open database at {}", config.db_path))?,
            );
            (sled.clone(), "sled", Some(sled))
        };

    info!(backend = backend_name, "storage backend ready");

    let state = AppState {
        registry: NodeRegistry::new(storage),
        storage_backend: backend_name.to_string(),
        started_at: Instant::now(),
    };

    let listen_addr = config.listen_addr();
    tokio::select! {
        result = start_server(state, &listen_addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    if let Some(sled) = sled_handle {
        sled.flush().context("failed to flush storage on shutdown")?;
    }

    info!("corral node registry shutdown complete");
    Ok(())
}
