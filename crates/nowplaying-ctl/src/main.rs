mod connection;
mod reporter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nowplaying_proto::artwork::{self, HttpImageProbe, PlaceholderSignature};
use nowplaying_proto::config::Config;
use nowplaying_proto::protocol::{MediaSnapshot, PlayerCommand, Reply, Request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::reporter::{Capture, Reporter};

#[derive(Parser)]
#[command(name = "nowplaying", about = "Talk to the now-playing hub")]
struct Cli {
    /// Hub socket address (defaults to the configured one).
    #[arg(long, global = true)]
    hub: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show what is playing right now.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Send playpause, rewind or forward to the playing tab.
    Send { command: PlayerCommand },
    /// Print every change of the now-playing record.
    Watch,
    /// Act as a reporter: captures on stdin, routed commands on stdout.
    Report {
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Find the best thumbnail for a YouTube video.
    Artwork { video_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries data in `report` mode, so logs go to stderr.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter.as_str())
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default();
    let address = cli.hub.unwrap_or_else(|| config.hub.address());

    match cli.command {
        Cmd::Status { json } => status(&address, json).await,
        Cmd::Send { command } => send(&address, command).await,
        Cmd::Watch => watch(&address).await,
        Cmd::Report { interval_ms } => {
            let interval = interval_ms.unwrap_or(config.reporter.interval_ms);
            if let Err(e) = report(&address, &config, Duration::from_millis(interval)).await {
                // The blocking stdin reader would otherwise hold the runtime open.
                eprintln!("Error: {:?}", e);
                std::process::exit(1);
            }
            Ok(())
        }
        Cmd::Artwork { video_id } => find_artwork(&config, &video_id).await,
    }
}

fn print_media(media: Option<&MediaSnapshot>) {
    let Some(media) = media else {
        println!("nothing playing");
        return;
    };
    let marker = if media.is_playing { "▶" } else { "⏸" };
    println!("{} {}", marker, media.title);
    println!("  source: {}", media.source_id);
    if let Some(image) = &media.image {
        println!("  artwork: {}", image);
    }
}

async fn status(address: &str, json: bool) -> anyhow::Result<()> {
    let (_, mut reader, mut writer) = connection::connect(address).await?;
    writer.send(Request::GetInfo).await?;
    loop {
        match reader.recv().await? {
            Some(Reply::Info { media }) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&media)?);
                } else {
                    print_media(media.as_ref());
                }
                return writer.shutdown().await;
            }
            Some(_) => continue,
            None => anyhow::bail!("hub closed the connection"),
        }
    }
}

async fn send(address: &str, command: PlayerCommand) -> anyhow::Result<()> {
    let (_, _reader, mut writer) = connection::connect(address).await?;
    writer.send(Request::SendCommand { command }).await?;
    writer.shutdown().await
}

async fn watch(address: &str) -> anyhow::Result<()> {
    let (_, mut reader, mut writer) = connection::connect(address).await?;
    writer.send(Request::Watch).await?;
    while let Some(reply) = reader.recv().await? {
        if let Reply::State { data } = reply {
            println!("── rev {}", data.rev);
            print_media(data.media.as_ref());
        }
    }
    Ok(())
}

async fn report(address: &str, config: &Config, interval: Duration) -> anyhow::Result<()> {
    let probe = HttpImageProbe::new(Duration::from_millis(config.artwork.probe_timeout_ms))
        .context("building artwork client")?;
    let (session, reader, writer) = connection::connect(address).await?;
    info!("reporting as source {}", session.source_id);

    let (capture_tx, capture_rx) = mpsc::channel::<Capture>(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<Capture>(&line) {
                    Ok(capture) => {
                        if capture_tx.send(capture).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("ignoring capture line: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });

    let (commands_tx, mut commands_rx) = mpsc::channel::<PlayerCommand>(16);
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(command) = commands_rx.recv().await {
            let line = format!("{}\n", serde_json::json!({ "command": command }));
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let reporter = Reporter::new(
        Arc::new(probe),
        config.artwork.youtube_base_url.clone(),
        interval,
    );
    reporter.run(capture_rx, reader, writer, commands_tx).await
}

async fn find_artwork(config: &Config, video_id: &str) -> anyhow::Result<()> {
    let probe = HttpImageProbe::new(Duration::from_millis(config.artwork.probe_timeout_ms))
        .context("building artwork client")?;
    let candidates = artwork::youtube_candidates(&config.artwork.youtube_base_url, video_id);
    match artwork::resolve(&candidates, &probe, &PlaceholderSignature::YOUTUBE).await {
        Some(url) => println!("{}", url),
        None => println!("no artwork"),
    }
    Ok(())
}
