use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use mathmate_core::config::MathmateConfig;
use mathmate_core::kernel::ProcessConnector;
use mathmate_core::{spawn_periodic_render, ArtifactKind, ArtifactSnapshot, Session};

const DEFAULT_LAYOUT: &str = "<!DOCTYPE html>
<html>
<head>
<meta charset='utf-8' />
<title>MathMate</title>
<style>
  .cell { display: flex; font-family: monospace; }
  .margin { color: #888; min-width: 6em; }
  .message .content { color: #b00; }
  .subdue { opacity: 0.5; }
</style>
<script>
  function toggle(group) {
    var cells = document.querySelectorAll('#resource_' + group + ' .return');
    cells.forEach(function (c) { c.style.display = c.style.display === 'none' ? '' : 'none'; });
  }
</script>
</head>
<body>
<%= yield %>
</body>
</html>
";

#[derive(Parser)]
#[command(name = "mathmate", version, about = "MathMate kernel session front end")]
struct Cli {
    /// Path to mathmate.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the cache root holding session folders and the layout.
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,
    /// Session identifier (default: a fresh UUID).
    #[arg(long, global = true)]
    session_id: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate expressions and emit the rendered transcript.
    Eval {
        /// Capture every result as an image when the kernel can.
        #[arg(long)]
        image: bool,
        /// Write the transcript page here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Expressions, evaluated in order.
        #[arg(required = true)]
        exprs: Vec<String>,
    },
    /// Read expressions from stdin, one per line.
    Repl {
        /// Capture every result as an image when the kernel can.
        #[arg(long)]
        image: bool,
    },
    /// List the symbols the kernel knows, as JSON.
    Symbols,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    mathmate_core::init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let session_id = cli
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match cli.command {
        Some(Command::Eval {
            image,
            output,
            exprs,
        }) => run_eval(&session_id, &config, image, &exprs, output.as_deref()).await,
        Some(Command::Repl { image }) => run_repl(&session_id, &config, image).await,
        Some(Command::Symbols) => run_symbols(&session_id, &config).await,
        None => {
            println!("mathmate v{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> Result<MathmateConfig> {
    let mut config = match &cli.config {
        Some(path) => MathmateConfig::load(path)
            .context(format!("failed to load config from {}", path.display()))?,
        None => MathmateConfig::load_or_default(),
    };
    if let Some(root) = &cli.cache_root {
        config.cache.root = root.clone();
    }
    Ok(config)
}

/// Make sure the cache root and its page template exist.
fn ensure_layout(config: &MathmateConfig) -> Result<()> {
    let root = &config.cache.root;
    std::fs::create_dir_all(root)
        .context(format!("failed to create cache root {}", root.display()))?;

    let template = root.join(&config.cache.layout_file);
    if !template.exists() {
        let page = DEFAULT_LAYOUT.replace("<%= yield %>", &config.cache.yield_token);
        std::fs::write(&template, page)
            .context(format!("failed to write layout {}", template.display()))?;
    }
    Ok(())
}

async fn open_session(session_id: &str, config: &MathmateConfig) -> Result<Session> {
    ensure_layout(config)?;
    let connector = Arc::new(ProcessConnector::from_config(&config.kernel));
    Session::open(session_id, config, connector)
        .await
        .context(format!(
            "failed to start kernel '{}'",
            config.kernel.command
        ))
}

async fn evaluate(session: &Session, expression: &str, image: bool) -> mathmate_core::Result<()> {
    if image {
        session.evaluate_as_image(expression).await
    } else {
        session.evaluate(expression).await
    }
}

async fn close(session: &Session) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close session cleanly");
    }
}

async fn run_eval(
    session_id: &str,
    config: &MathmateConfig,
    image: bool,
    exprs: &[String],
    output: Option<&Path>,
) -> Result<ExitCode> {
    let session = open_session(session_id, config).await?;

    let mut failed = false;
    for expression in exprs {
        if let Err(e) = evaluate(&session, expression, image).await {
            eprintln!("error evaluating {expression}: {e}");
            failed = true;
        }
    }

    let written = emit_transcript(&session, output).await;
    close(&session).await;
    written?;

    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn emit_transcript(session: &Session, output: Option<&Path>) -> Result<()> {
    let path = session.render().await.context("failed to render transcript")?;
    match output {
        Some(target) => {
            std::fs::copy(&path, target)
                .context(format!("failed to write transcript to {}", target.display()))?;
        }
        None => {
            let page = std::fs::read_to_string(&path)
                .context(format!("failed to read transcript {}", path.display()))?;
            print!("{page}");
        }
    }
    Ok(())
}

fn print_group(snapshot: &[ArtifactSnapshot], group: u32) {
    for artifact in snapshot.iter().filter(|a| a.group == group) {
        match artifact.kind {
            ArtifactKind::Input => {}
            ArtifactKind::Text | ArtifactKind::Message => println!("  {}", artifact.content),
            ArtifactKind::Image => {
                if let Some(file) = &artifact.file {
                    println!("Out[{group}] = <image {}>", file.display());
                }
            }
            ArtifactKind::Result if artifact.suppressed => {}
            ArtifactKind::Result => println!("Out[{group}] = {}", artifact.content),
        }
    }
}

async fn run_repl(session_id: &str, config: &MathmateConfig, image: bool) -> Result<ExitCode> {
    let session = Arc::new(open_session(session_id, config).await?);
    println!("Session {} ({})", session.id(), session.folder().display());

    let ticker = config
        .render
        .interval()
        .map(|period| spawn_periodic_render(Arc::clone(&session), period));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            ":reconnect" => match session.reconnect().await {
                Ok(()) => println!("kernel reconnected"),
                Err(e) => eprintln!("reconnect failed: {e}"),
            },
            ":render" => match session.render().await {
                Ok(path) => println!("{}", path.display()),
                Err(e) => eprintln!("render failed: {e}"),
            },
            expression => {
                let group = session.group().await;
                match evaluate(&session, expression, image).await {
                    Ok(()) => print_group(&session.snapshot().await, group),
                    Err(e) => eprintln!("error: {e}"),
                }
                if !session.is_reliable() {
                    eprintln!("kernel link is unreliable; use :reconnect");
                }
                match session.render().await {
                    Ok(path) => println!("transcript: {}", path.display()),
                    Err(e) => eprintln!("render failed: {e}"),
                }
            }
        }
    }

    close(&session).await;
    if let Some(handle) = ticker {
        let _ = handle.await;
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_symbols(session_id: &str, config: &MathmateConfig) -> Result<ExitCode> {
    let session = open_session(session_id, config).await?;
    let names = session.symbol_names().await;
    close(&session).await;

    let names = names.context("failed to list kernel symbols")?;
    println!("{}", serde_json::to_string_pretty(&names)?);
    Ok(ExitCode::SUCCESS)
}
