use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use chunkwire_core::{
    config::Config,
    decoder::{Decoder, StreamDecoder},
    transport::{self, ByteStream},
    DecoderRegistry, Preset, StreamSession, TimeoutPolicy,
};
use clap::{Args, Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod http;

#[derive(Parser)]
#[command(author, version, about = "chunkwire stream decoding smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Timeout preset; overrides the config file's preset
    #[arg(long, global = true)]
    preset: Option<Preset>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Selection {
    /// Provider id used to pick a decoder (e.g. zai, claude-code)
    #[arg(long)]
    provider: Option<String>,
    /// Force a decoder by id (openai-compat, claude-cli)
    #[arg(long)]
    decoder: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a captured stream from a file, or stdin when no file is given
    Decode {
        path: Option<PathBuf>,
        #[command(flatten)]
        select: Selection,
        #[arg(long, default_value = "")]
        content_type: String,
    },
    /// Spawn a CLI and decode its NDJSON stdout
    Exec {
        #[command(flatten)]
        select: Selection,
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// POST a JSON body to an SSE endpoint and decode the response
    Fetch {
        url: String,
        #[command(flatten)]
        select: Selection,
        /// Request body as inline JSON
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Environment variable holding a bearer token
        #[arg(long)]
        token_env: Option<String>,
    },
}

fn pick<'r>(
    reg: &'r DecoderRegistry,
    select: &Selection,
    default_provider: &str,
    content_type: &str,
) -> anyhow::Result<(&'r Decoder, String)> {
    let provider = select
        .provider
        .clone()
        .unwrap_or_else(|| default_provider.to_string());
    let decoder = match &select.decoder {
        Some(id) => reg
            .get(id)
            .ok_or_else(|| anyhow!("unknown decoder '{id}' (known: {:?})", reg.ids()))?,
        None => reg.select(&provider, content_type)?,
    };
    Ok((decoder, provider))
}

/// Runs one stream to completion, printing content on stdout and everything else on stderr.
async fn drive(
    decoder: &Decoder,
    vendor: &str,
    policy: TimeoutPolicy,
    cancel: &CancellationToken,
    input: ByteStream,
) -> anyhow::Result<()> {
    tracing::info!(decoder = decoder.id(), vendor, "decoding stream");
    let mut stdout = io::stdout();
    let report = StreamSession::new(decoder, vendor)
        .with_policy(policy)
        .with_cancellation(cancel)
        .run(input, |chunk| {
            if let Some(r) = &chunk.reasoning_delta {
                eprint!("{r}");
            }
            if let Some(t) = &chunk.content_delta {
                print!("{t}");
                stdout.flush().ok();
            }
        })
        .await;

    if !report.outcome.text.is_empty() {
        println!();
    }
    if let Some(summary) = &report.suppressed {
        eprintln!("[suppressed events: {}]", serde_json::to_string(summary)?);
    }
    eprintln!("{}", serde_json::to_string_pretty(&report.diagnostics)?);
    report.into_result()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(preset) = cli.preset {
        cfg.timeouts.preset = preset;
    }
    let policy = cfg.timeouts.to_policy()?;
    let reg = DecoderRegistry::from_config(&cfg)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Decode {
            path,
            select,
            content_type,
        } => {
            let (decoder, vendor) = pick(&reg, &select, "unknown", &content_type)?;
            let input = match path {
                Some(p) if p.as_os_str() != "-" => {
                    let file = tokio::fs::File::open(&p)
                        .await
                        .with_context(|| format!("opening {}", p.display()))?;
                    transport::from_async_read(file, cfg.reader.buffer_bytes)
                }
                _ => transport::from_async_read(tokio::io::stdin(), cfg.reader.buffer_bytes),
            };
            drive(decoder, &vendor, policy, &cancel, input).await?;
        }
        Commands::Exec {
            select,
            program,
            args,
        } => {
            let (decoder, vendor) = pick(&reg, &select, "claude-code", "")?;
            let mut child = tokio::process::Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawning {program}"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("child stdout was not captured"))?;

            let input = transport::from_child_stdout(stdout, cfg.reader.buffer_bytes);
            let result = drive(decoder, &vendor, policy, &cancel, input).await;
            if result.is_err() {
                child.start_kill().ok();
            }
            let status = child.wait().await?;
            tracing::debug!(%status, "child exited");
            result?;
        }
        Commands::Fetch {
            url,
            select,
            body,
            body_file,
            token_env,
        } => {
            let raw = match (body, body_file) {
                (Some(b), _) => b,
                (None, Some(p)) => std::fs::read_to_string(&p)
                    .with_context(|| format!("reading {}", p.display()))?,
                (None, None) => "{}".to_string(),
            };
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("request body is not valid JSON")?;

            let token = match token_env {
                Some(var) => Some(SecretString::from(
                    std::env::var(&var).with_context(|| format!("env var {var} not set"))?,
                )),
                None => None,
            };
            let auth = token
                .as_ref()
                .map(|t| format!("Bearer {}", t.expose_secret()));
            let mut headers: Vec<(&str, &str)> = Vec::new();
            if let Some(a) = &auth {
                headers.push(("Authorization", a.as_str()));
            }

            let client = reqwest::Client::new();
            let opened = http::post_json_stream(&client, &url, &payload, &headers).await?;
            let content_type = opened
                .content_type
                .unwrap_or_else(|| "text/event-stream".to_string());
            let (decoder, vendor) = pick(&reg, &select, "openai", &content_type)?;
            drive(decoder, &vendor, policy, &cancel, opened.body).await?;
        }
    }

    Ok(())
}
