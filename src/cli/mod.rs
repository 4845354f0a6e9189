use crate::config::load_config;
use crate::errors::CrucibleError;
use crate::orchestrator::Orchestrator;
use crate::providers::base::Message;
use crate::request::RequestDraft;
use crate::utils::cancel::{CancelSignal, CancelToken};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "crucible", version, about = "Local-first AI coding orchestrator")]
pub struct Cli {
    /// Path to the config file (default: ~/.crucible/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single request and print the response
    Run {
        /// The prompt to send
        prompt: String,
        /// Stream tokens to stdout as they arrive
        #[arg(long)]
        stream: bool,
        /// Run the multi-step tool-using agent instead of a plain completion
        #[arg(long)]
        agent: bool,
        /// Force a specific provider (lm-studio, ollama)
        #[arg(long)]
        provider: Option<String>,
        /// Request a specific model
        #[arg(long)]
        model: Option<String>,
    },
    /// Interactive session; messages accumulate across turns
    Repl,
    /// Run the loopback HTTP gateway
    Serve,
    /// Show provider health and available models
    Status,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}", e);
        anyhow::anyhow!("configuration error")
    })?;
    let orchestrator = Arc::new(Orchestrator::new(config)?);
    orchestrator.probe_providers().await;

    match cli.command {
        Command::Run {
            prompt,
            stream,
            agent,
            provider,
            model,
        } => {
            let mut draft = RequestDraft::from_prompt(prompt);
            draft.provider = provider;
            draft.model = model;
            draft.stream = stream;
            run_once(&orchestrator, draft, stream, agent).await
        }
        Command::Repl => repl(&orchestrator).await,
        Command::Serve => crate::gateway::serve(orchestrator).await,
        Command::Status => status(&orchestrator).await,
    }
}

async fn run_once(
    orchestrator: &Orchestrator,
    draft: RequestDraft,
    stream: bool,
    agent: bool,
) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let req = orchestrator.accept(draft).map_err(report_and_bail)?;

    if agent {
        let outcome = orchestrator
            .run_agent(&req, cancel)
            .await
            .map_err(report_and_bail)?;
        println!("{}", outcome.answer);
        return Ok(());
    }

    if stream {
        let mut session = orchestrator
            .stream(&req, cancel)
            .await
            .map_err(report_and_bail)?;
        let mut stdout = std::io::stdout();
        while let Some(token) = session.tokens.recv().await {
            if let Some(meta) = &token.metadata
                && let Some(error) = &meta.error
            {
                eprintln!("\nstream error: {error}");
                break;
            }
            print!("{}", token.content);
            let _ = stdout.flush();
        }
        println!();
        return Ok(());
    }

    let report = orchestrator
        .complete(&req, cancel)
        .await
        .map_err(report_and_bail)?;
    println!("{}", report.response.content);
    if report.escalated {
        warn!(
            providers = %report.providers.join(", "),
            "request was escalated"
        );
    }
    Ok(())
}

async fn repl(orchestrator: &Orchestrator) -> Result<()> {
    println!("crucible {} — interactive session (exit with Ctrl-D)", crate::VERSION);
    let (session_id, _) = orchestrator.sessions.resume(None).await;
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        let (_, history) = orchestrator.sessions.resume(Some(&session_id)).await;
        let mut draft = RequestDraft::from_prompt(prompt);
        draft.messages = history;
        draft
            .messages
            .push(Message::user(prompt));
        draft.context = Some(crate::providers::base::RequestContext {
            session_id: Some(session_id.clone()),
            ..Default::default()
        });

        let req = match orchestrator.accept(draft) {
            Ok(req) => req,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match orchestrator.complete(&req, CancelSignal::never()).await {
            Ok(report) => {
                println!("{}", report.response.content);
                orchestrator
                    .sessions
                    .record(
                        &session_id,
                        Message::user(prompt),
                        Message::assistant(report.response.content.clone(), None),
                    )
                    .await;
            }
            Err(e) => eprintln!("{}", render_report(&e)),
        }
    }
}

async fn status(orchestrator: &Orchestrator) -> Result<()> {
    for provider in orchestrator.status().await {
        let health = &provider.health;
        println!(
            "{:<12} {}  load {}/{}  avg {:.0}ms  error-rate {:.0}%",
            provider.name,
            if health.available { "up  " } else { "down" },
            health.current_load,
            health.max_load,
            health.avg_response_time_ms,
            health.error_rate * 100.0,
        );
        if let Some(last_error) = &health.last_error {
            println!("             last error: {last_error}");
        }
        for model in &provider.models {
            println!("             model: {model}");
        }
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancelSignal {
    let (token, signal) = CancelToken::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    signal
}

fn render_report(err: &CrucibleError) -> String {
    let report = err.report();
    let mut out = format!("[{}] {}", report.code, report.message);
    for suggestion in report.suggestions {
        out.push_str(&format!("\n  hint: {suggestion}"));
    }
    out
}

fn report_and_bail(err: CrucibleError) -> anyhow::Error {
    eprintln!("{}", render_report(&err));
    anyhow::anyhow!("request failed")
}
