//! rclink: encrypted messaging and file transfer over TCP
//!
//! Commands:
//!   server        - accept connections, print messages, store received files
//!   client        - connect, complete the key exchange, then prompt for
//!                   `message`, `file` or `quit`
//!   config show   - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use rclink_channel::{
    ChannelState, ProgressFn, Session, SessionConfig, SessionEvent, TcpTransport,
};
use rclink_core::config::LinkConfig;
use rclink_core::Role;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "rclink",
    version,
    about = "Encrypted messaging and file transfer",
    long_about = "rclink: Diffie-Hellman keyed, RC6-encrypted TCP channel for text messages and files"
)]
struct Cli {
    /// Path to rclink.toml configuration file
    #[arg(long, short = 'c', env = "RCLINK_CONFIG", default_value = "rclink.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error) [default: config log.level]
    #[arg(long, env = "RCLINK_LOG")]
    log: Option<String>,

    /// Log format [default: config log.format]
    #[arg(long, env = "RCLINK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept connections and receive messages and files
    Server {
        /// Listen address (overrides config server.listen)
        #[arg(long, short = 'l', env = "RCLINK_LISTEN")]
        listen: Option<String>,
        /// Directory for received files (overrides config transfer.output_dir)
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
    },

    /// Connect to a server and send messages and files interactively
    Client {
        /// Server address (overrides config client.connect)
        #[arg(long, env = "RCLINK_CONNECT")]
        connect: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = LinkConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.log.format));
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        config_found = cli.config.exists(),
        "rclink starting"
    );

    match cli.command {
        Commands::Server { listen, output_dir } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(dir) = output_dir {
                config.transfer.output_dir = dir;
            }
            cmd_server(&config).await
        }
        Commands::Client { connect } => {
            if let Some(connect) = connect {
                config.client.connect = connect;
            }
            cmd_client(&config).await
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid progress template")
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_byte_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )
        .expect("valid progress template")
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .expect("valid spinner template"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `rclink server` ───────────────────────────────────────────────────────────

async fn cmd_server(config: &LinkConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    let local = listener.local_addr().context("reading listen address")?;

    info!(addr = %local, output_dir = %config.transfer.output_dir.display(), "server listening");
    println!("Listening on {local}");
    println!("Received files go to {}", config.transfer.output_dir.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                info!(%peer, "connection accepted");
                tokio::spawn(serve_connection(stream, peer, SessionConfig::from(config)));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

/// Drive one accepted connection to completion.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, config: SessionConfig) {
    let transport = TcpTransport::from_stream(stream);
    let mut session = Session::new(transport, Role::Responder, config);
    let mut bar: Option<ProgressBar> = None;

    let result = session
        .run(|event| match event {
            SessionEvent::Established => println!("[{peer}] secure channel established"),
            SessionEvent::Message(text) => println!("[{peer}] message: {text}"),
            SessionEvent::TransferStarted {
                filename,
                size,
                total_chunks,
                path,
            } => {
                println!(
                    "[{peer}] receiving {filename} ({}) -> {}",
                    fmt_bytes(size),
                    path.display()
                );
                let pb = make_progress_bar(total_chunks, "recv");
                pb.set_message(filename);
                bar = Some(pb);
            }
            SessionEvent::ChunkReceived {
                received,
                total_chunks,
                ..
            } => {
                if let Some(pb) = &bar {
                    pb.set_length(total_chunks);
                    pb.set_position(received);
                }
            }
            SessionEvent::TransferCompleted(done) => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                if done.is_complete() {
                    println!(
                        "[{peer}] received {} ({})",
                        done.path.display(),
                        fmt_bytes(done.bytes_written)
                    );
                } else {
                    println!(
                        "[{peer}] {} closed incomplete: {}/{} chunks, {} of {}",
                        done.path.display(),
                        done.chunks_received,
                        done.total_chunks,
                        fmt_bytes(done.bytes_written),
                        fmt_bytes(done.size)
                    );
                }
            }
            SessionEvent::TransferAborted { filename } => {
                if let Some(pb) = bar.take() {
                    pb.abandon_with_message(format!("{filename} aborted"));
                }
                println!("[{peer}] transfer of {filename} aborted; partial file kept");
            }
        })
        .await;

    match result {
        Ok(()) => println!("[{peer}] disconnected"),
        Err(e) => {
            warn!(%peer, error = %e, "session ended with error");
            println!("[{peer}] connection closed: {e}");
        }
    }
}

// ── `rclink client` ───────────────────────────────────────────────────────────

/// One line of input at the client prompt.
#[derive(Debug, PartialEq, Eq)]
enum PromptCommand {
    /// `message [text]`; text is asked for when omitted
    Message(Option<String>),
    /// `file [path]`; path is asked for when omitted
    File(Option<PathBuf>),
    Quit,
    Empty,
    Unknown(String),
}

impl PromptCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest.trim()).filter(|r| !r.is_empty())),
            None => (line, None),
        };

        match head.to_ascii_lowercase().as_str() {
            "" => PromptCommand::Empty,
            "message" | "msg" | "m" => PromptCommand::Message(rest.map(str::to_string)),
            "file" | "f" => PromptCommand::File(rest.map(PathBuf::from)),
            "quit" | "exit" | "q" => PromptCommand::Quit,
            other => PromptCommand::Unknown(other.to_string()),
        }
    }
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    print!("{text}");
    std::io::stdout().flush().context("flushing stdout")?;
    lines.next_line().await.context("reading stdin")
}

async fn cmd_client(config: &LinkConfig) -> Result<()> {
    let addr = &config.client.connect;
    let transport = TcpTransport::connect(addr.as_str())
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    println!("Connected to {addr}");

    let mut session = Session::new(transport, Role::Initiator, SessionConfig::from(config));

    let spinner = make_spinner("handshake");
    spinner.set_message("exchanging keys");
    let handshake = session.handshake().await;
    spinner.finish_and_clear();
    handshake.context("key exchange failed")?;
    println!("Key exchange completed");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = prompt(&mut lines, "Enter command (message/file/quit): ").await? else {
            break;
        };

        let outcome = match PromptCommand::parse(&line) {
            PromptCommand::Empty => continue,
            PromptCommand::Quit => break,
            PromptCommand::Unknown(cmd) => {
                println!("Unknown command: {cmd}");
                continue;
            }
            PromptCommand::Message(text) => {
                let text = match text {
                    Some(text) => text,
                    None => match prompt(&mut lines, "Enter message: ").await? {
                        Some(text) => text,
                        None => break,
                    },
                };
                session.send_message(&text).await
            }
            PromptCommand::File(path) => {
                let path = match path {
                    Some(path) => path,
                    None => match prompt(&mut lines, "Enter file path: ").await? {
                        Some(path) => PathBuf::from(path.trim()),
                        None => break,
                    },
                };
                send_file(&mut session, &path).await
            }
        };

        if let Err(e) = outcome {
            if session.state() == ChannelState::Closed {
                return Err(e).context("connection lost");
            }
            println!("Error: {e}");
        }
    }

    session.close().await;
    println!("Connection closed");
    Ok(())
}

async fn send_file(
    session: &mut Session<TcpTransport>,
    path: &Path,
) -> std::result::Result<(), rclink_channel::ChannelError> {
    let pb = make_byte_bar("send");
    pb.set_message(path.display().to_string());

    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    match session.send_file(path, Some(&progress)).await {
        Ok(bytes) => {
            pb.finish_and_clear();
            println!("File {} sent successfully ({})", path.display(), fmt_bytes(bytes));
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e)
        }
    }
}

// ── `rclink config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &LinkConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
