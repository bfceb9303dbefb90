use std::path::PathBuf;
use std::sync::Arc;

use aiko::chat::{Message, Role};
use aiko::{
    ExchangeOutcome, PersistenceStatus, Session, SessionError, Settings, StoreSetupError,
    open_archive_store,
};
use aiko_assistant::{ClientError, HttpAssistantClient};
use clap::Parser;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "commands: /new, /history, /open <n>, /suggestions, /pick <n>, /quit";

#[derive(Debug, Parser)]
#[command(name = "aiko")]
#[command(about = "Terminal client for the Aiko assistant", long_about = None)]
struct Cli {
    /// Settings file to load instead of the per-user default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to build assistant client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to open archive store on `{stage}`: {source}"))]
    OpenStore {
        stage: &'static str,
        source: StoreSetupError,
    },
    #[snafu(display("failed to read from stdin on `{stage}`: {source}"))]
    ReadStdin {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write to stdout on `{stage}`: {source}"))]
    WriteStdout {
        stage: &'static str,
        source: std::io::Error,
    },
}

type AppResult<T> = Result<T, AppError>;

enum Command<'a> {
    Send(&'a str),
    NewSession,
    History,
    Open(usize),
    Suggestions,
    Pick(usize),
    Quit,
    Help,
    Invalid(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line);
        };
        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };
        match name {
            "new" => Self::NewSession,
            "history" => Self::History,
            "suggestions" => Self::Suggestions,
            "quit" | "exit" => Self::Quit,
            "help" => Self::Help,
            "open" => parse_index(argument).map_or(Self::Invalid(line), Self::Open),
            "pick" => parse_index(argument).map_or(Self::Invalid(line), Self::Pick),
            _ => Self::Invalid(line),
        }
    }
}

/// Terminal front-end entry point.
///
/// Bootstraps the assistant session with:
/// 1. Tracing output filtered by `RUST_LOG` (default `info`)
/// 2. Layered settings from `--config <path>` or the user config directory
/// 3. The HTTP assistant client, checked once for reachability (non-fatal)
/// 4. The configured archive store and a hydrated session
/// 5. A stdin loop mapping lines to session operations
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(cli).await {
        tracing::error!(error = %error, "aiko exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config_path = cli.config.unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load(&config_path);

    let client = HttpAssistantClient::new(settings.backend.client_config()).context(
        BuildClientSnafu {
            stage: "build-assistant-client",
        },
    )?;
    match client.health().await {
        Ok(()) => tracing::info!(base_url = %client.base_url(), "assistant backend reachable"),
        Err(error) => {
            tracing::warn!(
                base_url = %client.base_url(),
                error = %error,
                "assistant backend unreachable"
            );
        }
    }

    let store = open_archive_store(&settings.store)
        .await
        .context(OpenStoreSnafu {
            stage: "open-archive-store",
        })?;
    let session = Session::create(Arc::new(client), store);
    session.hydrate();

    let mut stdout = tokio::io::stdout();
    print_transcript(&mut stdout, &session).await?;
    write_line(&mut stdout, USAGE).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadStdinSnafu {
        stage: "read-command-line",
    })? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Command::Send(text) => {
                let result = session.send(text).await;
                report_exchange(&mut stdout, &session, result).await?;
            }
            Command::NewSession => {
                let result = session.new_session().await;
                if matches!(result, Ok(ExchangeOutcome::Completed { .. })) {
                    print_transcript(&mut stdout, &session).await?;
                } else {
                    report_exchange(&mut stdout, &session, result).await?;
                }
            }
            Command::History => {
                let recent = session.recent_chats();
                if recent.is_empty() {
                    write_line(&mut stdout, "no recent chats").await?;
                }
                for (index, entry) in recent.iter().enumerate() {
                    let line = format!("{}. {} ({})", index + 1, entry.title(), entry.timestamp());
                    write_line(&mut stdout, &line).await?;
                }
            }
            Command::Open(index) => match session.recent_chats().get(index) {
                Some(entry) => {
                    session.select_archived_chat(entry);
                    print_transcript(&mut stdout, &session).await?;
                }
                None => write_line(&mut stdout, "no such chat").await?,
            },
            Command::Suggestions => {
                for (index, suggestion) in session.suggestions().iter().enumerate() {
                    write_line(&mut stdout, &format!("{}. {suggestion}", index + 1)).await?;
                }
            }
            Command::Pick(index) => match session.suggestions().get(index).cloned() {
                Some(suggestion) => {
                    let result = session.select_suggestion(&suggestion).await;
                    report_exchange(&mut stdout, &session, result).await?;
                }
                None => write_line(&mut stdout, "no such suggestion").await?,
            },
            Command::Quit => break,
            Command::Help => write_line(&mut stdout, USAGE).await?,
            Command::Invalid(input) => {
                let line = format!("unrecognized command `{input}`; {USAGE}");
                write_line(&mut stdout, &line).await?;
            }
        }
    }

    session.dispose();
    Ok(())
}

/// One-based list position to a zero-based index.
fn parse_index(argument: &str) -> Option<usize> {
    argument.parse::<usize>().ok()?.checked_sub(1)
}

async fn report_exchange(
    stdout: &mut Stdout,
    session: &Session,
    result: Result<ExchangeOutcome, SessionError>,
) -> AppResult<()> {
    match result {
        Ok(outcome) => {
            if let Some(message) = session.transcript().last() {
                print_message(stdout, message).await?;
            }
            if let Some(image) = session.image() {
                write_line(stdout, &format!("[image: {}]", image.as_str())).await?;
            }
            match outcome {
                ExchangeOutcome::Completed {
                    persistence: PersistenceStatus::QuotaExceeded,
                } => write_line(stdout, "(recent chats not saved: storage full)").await,
                ExchangeOutcome::Completed {
                    persistence: PersistenceStatus::Degraded { reason },
                } => write_line(stdout, &format!("(recent chats not saved: {reason})")).await,
                _ => Ok(()),
            }
        }
        Err(error) => write_line(stdout, &format!("({error})")).await,
    }
}

async fn print_transcript(stdout: &mut Stdout, session: &Session) -> AppResult<()> {
    for message in session.transcript().messages() {
        print_message(stdout, message).await?;
    }
    Ok(())
}

async fn print_message(stdout: &mut Stdout, message: &Message) -> AppResult<()> {
    let speaker = match message.sender() {
        Role::User => "you",
        Role::Assistant => "aiko",
        Role::SystemNote => "--",
    };
    write_line(stdout, &format!("{speaker}> {}", message.text())).await
}

async fn write_line(stdout: &mut Stdout, line: &str) -> AppResult<()> {
    let stage = "write-stdout-line";
    stdout
        .write_all(line.as_bytes())
        .await
        .context(WriteStdoutSnafu { stage })?;
    stdout
        .write_all(b"\n")
        .await
        .context(WriteStdoutSnafu { stage })?;
    stdout.flush().await.context(WriteStdoutSnafu { stage })
}
