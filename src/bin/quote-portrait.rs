use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use quote_portrait::gateway::{self, PortraitHttpState, logging::init_tracing};
use quote_portrait::poster::poster_filename_now;
use quote_portrait::{
    Env, ExportFormat, GenerationRequest, PortraitOrchestrator, ProviderResult, ProviderSettings,
    QuoteClient, ServerConfig, SignTimestamp, portrait_prompt,
};

#[derive(Parser, Debug)]
#[command(name = "quote-portrait", version)]
struct Cli {
    /// `.env` file layered over the process environment (default: `./.env` when present).
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// TOML server config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP relay.
    Serve(ServeArgs),
    /// Generate one portrait through the fallback chain.
    Portrait(PortraitArgs),
    /// Fetch a famous quote for a name.
    Quote(QuoteArgs),
    /// Print a signed envelope for the async image API.
    Sign(SignArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[derive(Args, Debug)]
struct PortraitArgs {
    #[arg(long)]
    name: String,

    /// Use this prompt instead of the studio-portrait template.
    #[arg(long)]
    prompt: Option<String>,

    /// Call a running relay at this base URL instead of the providers directly.
    #[arg(long)]
    relay: Option<String>,

    /// Write the decoded image here (inline results only). A directory gets a
    /// timestamped `quote-*.png` inside it.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QuoteArgs {
    #[arg(long)]
    name: String,
}

#[derive(Args, Debug)]
struct SignArgs {
    /// Raw request body.
    #[arg(long, default_value = "")]
    body: String,

    /// Query parameter as `key=value`; repeatable.
    #[arg(long = "query", value_parser = parse_query_pair)]
    query: Vec<(String, String)>,

    /// Fixed `YYYYMMDDTHHMMSSZ` timestamp instead of the current time.
    #[arg(long)]
    x_date: Option<String>,
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs).map_err(|err| err.to_string())?;

    let env = load_env(cli.dotenv.as_deref())?;
    let settings = ProviderSettings::from_env(&env);
    let config = match cli.config.as_deref() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    match cli.cmd {
        Command::Serve(args) => serve(settings, config, args).await,
        Command::Portrait(args) => portrait(&settings, &config, args).await,
        Command::Quote(args) => quote(&settings, args).await,
        Command::Sign(args) => sign(&settings, args),
    }
}

fn load_env(path: Option<&Path>) -> Result<Env, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Env::from_dotenv_file(path)?),
        None => {
            let default = Path::new(".env");
            if default.is_file() {
                Ok(Env::from_dotenv_file(default)?)
            } else {
                Ok(Env::default())
            }
        }
    }
}

async fn serve(
    settings: ProviderSettings,
    mut config: ServerConfig,
    args: ServeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let listen = config.listen.clone();
    tracing::info!(?settings, "provider settings loaded");

    let state = PortraitHttpState::new(settings, config)?;
    let app = gateway::router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(listen = %listen, "quote-portrait relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn export_format(image: &ProviderResult) -> ExportFormat {
    match image {
        ProviderResult::Base64 { media_type, .. } if media_type == "image/jpeg" => {
            ExportFormat::Jpeg
        }
        _ => ExportFormat::Png,
    }
}

async fn portrait(
    settings: &ProviderSettings,
    config: &ServerConfig,
    args: PortraitArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let prompt = args.prompt.unwrap_or_else(|| portrait_prompt(&args.name));
    let request = GenerationRequest::new(prompt)?;
    let orchestrator = match args.relay.as_deref() {
        Some(base_url) => PortraitOrchestrator::via_relay(base_url, config)?,
        None => PortraitOrchestrator::from_settings(settings, config)?,
    };

    let outcome = orchestrator.generate(&request).await?;
    tracing::info!(stage = ?outcome.stage, backend = %outcome.backend, "portrait ready");

    match (args.output, outcome.image.decode_bytes()) {
        (Some(path), Some(bytes)) => {
            let path = if path.is_dir() {
                path.join(poster_filename_now(export_format(&outcome.image))?)
            } else {
                path
            };
            tokio::fs::write(&path, bytes?).await?;
            println!("{}", path.display());
        }
        (Some(path), None) => {
            tracing::warn!(path = %path.display(), "portrait is a URL; nothing written");
            println!("{}", outcome.image.display_ref());
        }
        (None, _) => println!("{}", outcome.image.display_ref()),
    }
    Ok(())
}

async fn quote(
    settings: &ProviderSettings,
    args: QuoteArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = QuoteClient::from_settings(settings.require_deepseek()?)?;
    println!("{}", client.generate_quote(&args.name).await?);
    Ok(())
}

fn sign(settings: &ProviderSettings, args: SignArgs) -> Result<(), Box<dyn std::error::Error>> {
    let signer = settings.require_jimeng()?.signer()?;
    let query: BTreeMap<String, String> = args.query.into_iter().collect();
    let timestamp = match args.x_date.as_deref() {
        Some(x_date) => SignTimestamp::from_x_date(x_date)?,
        None => SignTimestamp::now()?,
    };

    let envelope = signer.sign("POST", &args.body, &query, timestamp)?;
    let out = serde_json::json!({
        "authorization": envelope.authorization,
        "x_date": envelope.x_date,
        "payload_hash": envelope.payload_hash,
        "canonical_request_hash": envelope.canonical_request_hash(),
        "string_to_sign_hash": envelope.string_to_sign_hash(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
