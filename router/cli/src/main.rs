//! llm-router - Adaptive LLM Routing from the Command Line
//!
//! Builds one [`Router`] from the resolved configuration, runs a single
//! command against it, and closes it again.
//!
//! # Usage
//!
//! ```bash
//! # One completion, served by whichever provider is best right now
//! llm-router generate "Explain borrow checking in one paragraph"
//!
//! # Stream the answer, prefer the local engine
//! llm-router --prefer-local generate --stream "Write a haiku"
//!
//! # Provider health and quotas
//! llm-router status
//! llm-router limits
//!
//! # Verbose logging
//! RUST_LOG=debug llm-router status
//! ```
//!
//! Exit code 0 on success, 1 when the request could not be routed.

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use router_core::{GenerateRequest, ProviderStatus, RateLimitInfo, Router};
use tracing::{debug, info};

use config::{load_config, CliOverrides};

/// Adaptive client-side router for LLM completions
#[derive(Parser, Debug)]
#[command(name = "llm-router")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "LLM_ROUTER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Try local providers before the shared tiers
    #[arg(long, global = true)]
    prefer_local: bool,

    /// Try this provider first
    #[arg(short = 'p', long = "provider", global = true, value_name = "NAME")]
    provider: Option<String>,

    /// Return the first provider's error instead of falling back
    #[arg(long, global = true)]
    no_fallback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a completion
    Generate {
        /// The prompt
        prompt: String,

        /// System instruction
        #[arg(short = 's', long)]
        system: Option<String>,

        /// Print chunks as they arrive
        #[arg(long)]
        stream: bool,

        /// Sampling temperature (0.0-2.0)
        #[arg(short = 't', long, default_value_t = 0.7)]
        temperature: f32,

        /// Maximum tokens to generate
        #[arg(short = 'm', long, default_value_t = 2048)]
        max_tokens: u32,
    },

    /// Show provider health, tiers and failure counts
    Status,

    /// Show each provider's current rate limits
    Limits,
}

/// Initialize logging; `RUST_LOG` wins over the default filter
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("router_cli=info,router_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let overrides = CliOverrides {
        provider: args.provider.clone(),
        prefer_local: args.prefer_local,
        no_fallback: args.no_fallback,
    };
    let config = load_config(args.config.as_deref(), &overrides).context("Failed to load configuration")?;
    debug!(
        source = %config.source(),
        file = ?config.config_file_path,
        "Configuration resolved"
    );

    let router = Router::from_config(config.router).context("Failed to build router")?;
    router.initialize().await;

    let code = match args.command {
        Command::Generate {
            prompt,
            system,
            stream,
            temperature,
            max_tokens,
        } => {
            let mut request = GenerateRequest::new(prompt)
                .with_temperature(temperature)
                .with_max_tokens(max_tokens)
                .with_stream(stream);
            if let Some(system) = system {
                request = request.with_system(system);
            }

            if stream {
                stream_completion(&router, &request).await?
            } else {
                complete(&router, &request).await
            }
        }
        Command::Status => {
            print_status(&router.status(), &router.priority_order());
            ExitCode::SUCCESS
        }
        Command::Limits => {
            print_limits(&router.rate_limits().await);
            ExitCode::SUCCESS
        }
    };

    router.close().await;
    Ok(code)
}

async fn complete(router: &Router, request: &GenerateRequest) -> ExitCode {
    match router.generate(request).await {
        Ok(response) => {
            println!("{}", response.text);
            eprintln!(
                "[{} / {} / {} tokens]",
                response.provider, response.model, response.usage.total_tokens
            );
            info!(provider = %response.provider, "Request served");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn stream_completion(router: &Router, request: &GenerateRequest) -> Result<ExitCode> {
    let mut stdout = std::io::stdout();
    let mut chunks = router.generate_stream_tagged(request);
    let mut served_by = None;
    let mut code = ExitCode::SUCCESS;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                write!(stdout, "{}", chunk.text).context("Failed to write to stdout")?;
                stdout.flush().context("Failed to flush stdout")?;
                served_by = Some(chunk.provider);
            }
            Err(e) => {
                eprintln!("\n{e}");
                code = ExitCode::FAILURE;
                break;
            }
        }
    }
    drop(chunks);
    writeln!(stdout).context("Failed to write to stdout")?;

    if let Some(name) = served_by {
        eprintln!("[{name}]");
        info!(provider = %name, "Stream served");
    }

    Ok(code)
}

fn print_status(statuses: &std::collections::BTreeMap<String, ProviderStatus>, order: &[String]) {
    println!(
        "{:<16} {:<6} {:<12} {:<9} {:<20} LAST ERROR",
        "PROVIDER", "TIER", "HEALTH", "FAILURES", "QUOTA"
    );

    for name in order {
        let Some(status) = statuses.get(name) else {
            continue;
        };
        let quota = status.rate_limit.as_ref().map_or_else(|| "-".to_string(), format_quota);
        println!(
            "{:<16} {:<6} {:<12} {:<9} {:<20} {}",
            status.name,
            status.tier.to_string(),
            status.health().to_string(),
            status.consecutive_failures,
            quota,
            status.last_error.as_deref().unwrap_or("-")
        );
    }
}

fn print_limits(limits: &std::collections::BTreeMap<String, RateLimitInfo>) {
    if limits.is_empty() {
        println!("No available providers reported rate limits.");
        return;
    }

    for (name, info) in limits {
        let reset = info
            .reset_at
            .map_or_else(String::new, |r| format!(" (resets {})", r.format("%Y-%m-%d %H:%M UTC")));
        println!("{name:<16} {}{reset}", format_quota(info));
    }
}

fn format_quota(info: &RateLimitInfo) -> String {
    if info.is_unlimited() {
        "unlimited".to_string()
    } else {
        format!("{}/{} per {}", info.remaining, info.limit, info.period)
    }
}
