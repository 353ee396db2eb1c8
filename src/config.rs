use crate::llm::{BackendDescriptor, FactoryEnvironment};
use crate::llm::factory::MATURITY_VAR;
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::env;
use std::time::Duration;

/// Config file picked up from the working directory when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Backend interface (e.g. ChatOllama)
    #[arg(long)]
    pub backend: Option<String>,

    /// Model name as listed by the backend
    #[arg(long)]
    pub model: Option<String>,

    /// Backend endpoint (scheme optional)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Skip backend construction entirely
    #[arg(long)]
    pub test_mode: Option<bool>,

    /// Directory for persisted conversation threads
    #[arg(long)]
    pub checkpoint_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub interface: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub temperature: f32,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub test_mode: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub default_user: String,
    pub default_thread_index: u64,
    pub max_threads: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub checkpoint_dir: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.cors_origins", vec!["*"])?
            .set_default("server.request_timeout_secs", 120)?
            .set_default("backend.interface", "ChatOllama")?
            .set_default("backend.model", "mistral_nemo_conservative")?
            .set_default("backend.temperature", 0.5)?
            .set_default("backend.options.num_predict", 1500)?
            .set_default("backend.probe_timeout_secs", 5)?
            .set_default("backend.request_timeout_secs", 300)?
            .set_default("backend.test_mode", false)?
            .set_default("sessions.default_user", "default")?
            .set_default("sessions.default_thread_index", 42)?
            .set_default("sessions.max_threads", 1024)?
            .set_default("sessions.idle_timeout_secs", 3600)?
            .set_default("sessions.sweep_interval_secs", 60)?;

        // 2. Config file: explicit path must exist, ./config.yaml is optional
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false)),
        };

        // 3. Environment variables, e.g. ORACLE_SERVER__PORT=9000
        builder = builder.add_source(
            Environment::with_prefix("ORACLE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        // 4. Legacy variables understood by earlier deployments
        if env::var(MATURITY_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("test")) {
            builder = builder.set_override("backend.test_mode", true)?;
        }

        // 5. CLI flags win over everything else
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(backend) = cli.backend {
            builder = builder.set_override("backend.interface", backend)?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("backend.model", model)?;
        }
        if let Some(endpoint) = cli.endpoint {
            builder = builder.set_override("backend.endpoint", endpoint)?;
        }
        if let Some(temperature) = cli.temperature {
            builder = builder.set_override("backend.temperature", f64::from(temperature))?;
        }
        if let Some(test_mode) = cli.test_mode {
            builder = builder.set_override("backend.test_mode", test_mode)?;
        }
        if let Some(dir) = cli.checkpoint_dir {
            builder = builder.set_override("sessions.checkpoint_dir", dir)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// The backend descriptor this configuration asks for.
    #[must_use]
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            interface: self.backend.interface.clone(),
            model_name: self.backend.model.clone(),
            endpoint: self
                .backend
                .endpoint
                .clone()
                .filter(|e| !e.trim().is_empty()),
            temperature: self.backend.temperature,
            options: self.backend.options.clone(),
        }
    }

    /// Factory inputs, with `OLLAMA_ENDPOINT` read once from the process environment.
    #[must_use]
    pub fn factory_environment(&self) -> FactoryEnvironment {
        FactoryEnvironment {
            test_mode: self.backend.test_mode,
            probe_timeout: Duration::from_secs(self.backend.probe_timeout_secs),
            request_timeout: Duration::from_secs(self.backend.request_timeout_secs),
            ..FactoryEnvironment::from_process_env()
        }
    }
}
