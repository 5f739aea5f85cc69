//! gatelink server binary
//!
//! Usage: gatelink-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Path to configuration file
//!   -b, --bundles <FILE>    JSON file of address -> identity bundle
//!   -g, --generate          Generate new server configuration
//!   -h, --help              Print help information

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use gatelink::server::{
    AuthHooks, AuthOutcome, AuthenticatedEvent, DeclinedEvent, Environment, IdentityBundle,
    IdentityResolver, Server, ServerConfigFile,
};
use gatelink::{Error, Result};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — respects RUST_LOG env var (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-g" | "--generate" => {
            generate_config()?;
        }
        "-c" | "--config" => {
            if args.len() < 3 {
                eprintln!("Error: --config requires a file path");
                return Ok(());
            }
            let bundles = match args.get(3).map(String::as_str) {
                Some("-b") | Some("--bundles") => args.get(4).cloned(),
                _ => None,
            };
            run_server(&args[2], bundles.as_deref()).await?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"gatelink server - multi-party QR login engine

USAGE:
    gatelink-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -b, --bundles <FILE>    JSON file mapping addresses to identity bundles
    -g, --generate          Generate new server configuration
    -h, --help              Print help information

EXAMPLES:
    Generate a new configuration:
        gatelink-server --generate > server.toml

    Run the server:
        gatelink-server --config server.toml --bundles bundles.json
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let config = gatelink::ServerConfig::new(
        &uuid::Uuid::new_v4().to_string(),
        "change-this-shared-secret",
        Environment::Sandbox,
    )
    .expect("generated project id is a UUID");
    let config_file = ServerConfigFile::from_config(&config);

    println!("# gatelink server configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", toml::to_string_pretty(&config_file)?);
    println!("# Set shared_secret to the value agreed with your gate project.");

    Ok(())
}

async fn run_server(config_path: &str, bundles_path: Option<&str>) -> anyhow::Result<()> {
    let config_content = std::fs::read_to_string(config_path)?;
    let config_file: ServerConfigFile = toml::from_str(&config_content)?;
    let config = config_file.to_config()?;

    let resolver: Arc<dyn IdentityResolver> = match bundles_path {
        Some(path) => Arc::new(FileResolver::load(path)?),
        None => {
            tracing::warn!("no --bundles file given; every auth step will fail resolution");
            Arc::new(FileResolver::empty())
        }
    };

    tracing::info!(
        "starting gatelink server on {}:{} ({:?})",
        config.listen_addr,
        config.listen_port,
        config.environment
    );

    let server = Server::new(config, Arc::new(LoggingHooks), resolver)?;
    server.run().await?;

    Ok(())
}

/// Stand-in application hooks: accept every registered identity and issue
/// a short descriptive token. Real deployments inject their own.
struct LoggingHooks;

#[async_trait]
impl AuthHooks for LoggingHooks {
    async fn identity_check(&self, address: &str) -> Result<bool> {
        tracing::info!("identity check for {address}");
        Ok(true)
    }

    async fn authenticated(&self, event: AuthenticatedEvent) -> Result<AuthOutcome> {
        tracing::info!("authenticated {}", event.address);
        Ok(AuthOutcome {
            token: Some(json!({
                "address": event.address,
                "issuedAt": chrono::Utc::now().to_rfc3339(),
            })),
            error: None,
        })
    }

    async fn declined(&self, event: DeclinedEvent) -> Result<()> {
        tracing::info!(
            "declined session {} by {} ({})",
            event.session_id,
            event.declined_by,
            event.reason.as_str()
        );
        Ok(())
    }
}

/// Identity resolver backed by a local JSON file of
/// `{ "<address>": { "signingPublicKey": …, … }, … }`.
struct FileResolver {
    bundles: HashMap<String, IdentityBundle>,
}

impl FileResolver {
    fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let bundles: HashMap<String, IdentityBundle> = serde_json::from_str(&content)?;
        tracing::info!("loaded {} identity bundles from {path}", bundles.len());
        Ok(Self { bundles })
    }

    fn empty() -> Self {
        Self {
            bundles: HashMap::new(),
        }
    }
}

#[async_trait]
impl IdentityResolver for FileResolver {
    async fn resolve(&self, address: &str) -> Result<IdentityBundle> {
        self.bundles
            .get(address)
            .cloned()
            .ok_or_else(|| Error::config(format!("no identity bundle for {address}")))
    }
}
