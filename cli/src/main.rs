//! Berth: render MCP server workloads for Kubernetes and manage their secrets.
//!
//! Subcommands:
//! - `berth render`: build a server intent from berth.toml + flags, print the
//!   Deployment/Service/ConfigMap as multi-document YAML
//! - `berth secrets`: list, read, or sync an environment's secrets
//! - `berth sanitize`: redact an environment's secrets from JSON on stdin

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nimbus_berth::{
    BerthManifest, DeployOverrides, SecretProvider, SecretProviderConfig, Translator,
    TransportKind, secret_manifest,
};
use tracing_subscriber::EnvFilter;

/// Berth: render MCP server workloads for Kubernetes and manage their secrets.
#[derive(Parser)]
#[command(name = "berth", version, about)]
struct Cli {
    /// Path to berth.toml [default: ./berth.toml or ~/.config/berth/berth.toml]
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the Kubernetes objects for this project's MCP server
    Render(RenderArgs),
    /// Inspect or sync per-environment secrets
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
    /// Read JSON on stdin and write it back with secrets redacted
    Sanitize {
        /// Environment whose secret values are redacted
        #[arg(short, long)]
        environment: String,
        /// Also redact string values under credential-like field names
        #[arg(long)]
        redact_fields: bool,
    },
}

#[derive(Args)]
struct RenderArgs {
    /// Environment whose secret provider supplies the secret reference
    #[arg(short, long)]
    environment: Option<String>,
    /// Resource name [default: project name]
    #[arg(long)]
    name: Option<String>,
    #[arg(short, long)]
    namespace: Option<String>,
    /// Container image [default: <name>:<version>]
    #[arg(long)]
    image: Option<String>,
    /// Port the proxy listens on
    #[arg(short, long)]
    port: Option<u16>,
    /// stdio or http
    #[arg(long)]
    transport: Option<TransportKind>,
    /// Command starting the MCP process
    #[arg(long)]
    command: Option<String>,
    /// Argument for the command (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,
    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,
    /// HTTP transport: port the MCP process listens on [default: --port]
    #[arg(long)]
    target_port: Option<u16>,
    /// HTTP transport: path the MCP process serves [default: /mcp]
    #[arg(long)]
    target_path: Option<String>,
    /// UID of the owning resource, if already created
    #[arg(long)]
    owner_uid: Option<String>,
    /// Proxy image override
    #[arg(long)]
    proxy_image: Option<String>,
    /// Write YAML to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// List secret keys (values are never printed)
    List {
        #[arg(short, long)]
        environment: String,
    },
    /// Print one secret value
    Get {
        key: String,
        #[arg(short, long)]
        environment: String,
    },
    /// Emit a Secret manifest carrying one environment's secrets for another
    Sync {
        /// Source environment
        #[arg(long)]
        from: String,
        /// Target environment; must use the kubernetes provider
        #[arg(long)]
        to: String,
        /// Write YAML to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with env filter (RUST_LOG controls verbosity)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest_path = resolve_manifest(cli.manifest)?;
    let manifest = load_manifest(&manifest_path).await?;
    let base_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    match cli.command {
        Commands::Render(args) => run_render(&manifest, args).await?,
        Commands::Secrets { command } => run_secrets(&manifest, &base_dir, command).await?,
        Commands::Sanitize {
            environment,
            redact_fields,
        } => run_sanitize(&manifest, &base_dir, &environment, redact_fields).await?,
    }

    Ok(())
}

async fn run_render(manifest: &BerthManifest, args: RenderArgs) -> Result<()> {
    let overrides = DeployOverrides {
        name: args.name,
        namespace: args.namespace,
        image: args.image,
        port: args.port,
        transport: args.transport,
        command: args.command,
        args: args.args,
        env: args.env.into_iter().collect(),
        target_port: args.target_port,
        target_path: args.target_path,
        environment: args.environment,
        uid: args.owner_uid,
    };
    let intent = manifest
        .build_intent(&overrides)
        .map_err(|e| anyhow::anyhow!("Failed to build server intent: {}", e))?;

    let mut translator = Translator::new();
    if let Some(image) = args.proxy_image {
        translator = translator.with_proxy_image(image);
    }
    let yaml = translator
        .translate(&intent)
        .and_then(|outputs| outputs.to_yaml())
        .map_err(|e| anyhow::anyhow!("Failed to render '{}': {}", intent.name, e))?;

    tracing::info!(
        server = %intent.name,
        namespace = %intent.namespace,
        transport = %intent.transport_kind(),
        "Rendered server workload"
    );
    write_output(args.output.as_deref(), &yaml).await
}

async fn run_secrets(
    manifest: &BerthManifest,
    base_dir: &Path,
    command: SecretsCommand,
) -> Result<()> {
    match command {
        SecretsCommand::List { environment } => {
            let provider = connect(manifest, base_dir, &environment).await?;
            let keys = provider
                .list_keys()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list secrets: {}", e))?;
            for key in keys {
                println!("{}", key);
            }
        }
        SecretsCommand::Get { key, environment } => {
            let provider = connect(manifest, base_dir, &environment).await?;
            let value = provider
                .get(&key)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read secret: {}", e))?;
            println!("{}", value);
        }
        SecretsCommand::Sync { from, to, output } => {
            let (secret_name, namespace) = match manifest
                .provider_config(&to)
                .map_err(|e| anyhow::anyhow!("{}", e))?
            {
                SecretProviderConfig::Kubernetes {
                    secret_name,
                    namespace,
                    ..
                } => (secret_name.clone(), namespace.clone()),
                SecretProviderConfig::Env { .. } => {
                    return Err(anyhow::anyhow!(
                        "Environment '{}' uses the env provider; sync targets must use kubernetes",
                        to
                    ));
                }
            };

            let provider = connect(manifest, base_dir, &from).await?;
            let values: BTreeMap<String, String> = provider
                .get_all()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read secrets from '{}': {}", from, e))?;
            let secret = secret_manifest(&secret_name, &namespace, &values);
            let yaml = serde_yaml::to_string(&secret)
                .map_err(|e| anyhow::anyhow!("Failed to serialize secret: {}", e))?;

            tracing::info!(
                from = %from,
                to = %to,
                secret = %format!("{}/{}", namespace, secret_name),
                keys = values.len(),
                "Rendered secret manifest"
            );
            write_output(output.as_deref(), &yaml).await?;
        }
    }
    Ok(())
}

async fn run_sanitize(
    manifest: &BerthManifest,
    base_dir: &Path,
    environment: &str,
    redact_fields: bool,
) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| anyhow::anyhow!("Failed to read stdin: {}", e))?;
    let data: serde_json::Value = serde_json::from_str(&input)
        .map_err(|e| anyhow::anyhow!("stdin is not valid JSON: {}", e))?;

    let provider = connect(manifest, base_dir, environment).await?;
    let mut sanitizer = provider
        .sanitizer()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to sanitize: {}", e))?;
    if redact_fields {
        sanitizer = sanitizer.with_field_redaction();
    }
    let sanitized = sanitizer.sanitize_value(&data);
    let pretty = serde_json::to_string_pretty(&sanitized)
        .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?;
    println!("{}", pretty);
    Ok(())
}

async fn connect(
    manifest: &BerthManifest,
    base_dir: &Path,
    environment: &str,
) -> Result<SecretProvider> {
    let config = manifest
        .provider_config(environment)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    SecretProvider::from_config(environment, config, base_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize secret provider: {}", e))
}

async fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to write {:?}: {}", path, e))?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Resolve manifest path: explicit flag → ./berth.toml → ~/.config/berth/berth.toml.
fn resolve_manifest(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = Path::new("berth.toml");
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("berth").join("berth.toml");
        if xdg.exists() {
            return Ok(xdg);
        }
    }

    Err(anyhow::anyhow!(
        "No berth.toml found. Searched ./berth.toml and ~/.config/berth/berth.toml. \
         Use --manifest to specify a path."
    ))
}

/// Load, parse and validate a berth.toml manifest.
async fn load_manifest(path: &Path) -> Result<BerthManifest> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read manifest {:?}: {}", path, e))?;
    BerthManifest::from_toml_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest {:?}: {}", path, e))
}
