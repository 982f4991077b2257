//! Live Stream Client
//!
//! Streams microphone audio and camera snapshots to a conversational service
//! and plays back its spoken replies. Lines typed into the terminal are sent
//! as text; lines starting with `/` are commands.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_stream_client::{
    audio::{list_devices, CpalMicrophone, CpalSpeaker},
    config::{AppConfig, VideoSourceConfig},
    protocol::{ConnectionState, Origin, SessionUpdate, StreamConfigUpdate, Voice},
    session::{SessionDevices, SessionHandle, SessionOptions, SessionRunner},
    transport::WsConnector,
    ui::WebServer,
    video::{ImageFileSource, TestPatternSource, VideoSource},
};

#[derive(Parser, Debug)]
#[command(name = "live-client", version, about = "Real-time voice and camera client")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service WebSocket URL
    #[arg(long)]
    url: Option<String>,

    /// Voice for synthesized replies
    #[arg(long)]
    voice: Option<Voice>,

    #[arg(long)]
    system_prompt: Option<String>,

    /// Do not start the HTTP control API
    #[arg(long)]
    no_ui: bool,

    /// Control API port
    #[arg(long)]
    port: Option<u16>,
}

/// Terminal command
#[derive(Debug, PartialEq)]
enum Command {
    Start,
    Stop,
    Camera,
    Devices,
    Status,
    Quit,
    Text(String),
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let command = match line {
        "/start" => Command::Start,
        "/stop" => Command::Stop,
        "/camera" => Command::Camera,
        "/devices" => Command::Devices,
        "/status" => Command::Status,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other.to_string()),
        text => Command::Text(text.to_string()),
    };
    Some(command)
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;

    if let Some(url) = &args.url {
        config.server.url = url.clone();
    }
    if let Some(port) = args.port {
        config.ui.http_port = port;
    }
    if args.no_ui {
        config.ui.enabled = false;
    }
    config.stream.apply(StreamConfigUpdate {
        system_prompt: args.system_prompt.clone(),
        voice: args.voice,
        ..Default::default()
    });

    config.validate()?;
    Ok(config)
}

fn camera_for(config: &VideoSourceConfig) -> Box<dyn VideoSource> {
    match config {
        VideoSourceConfig::TestPattern { width, height } => Box::new(TestPatternSource::new(*width, *height)),
        VideoSourceConfig::File { path } => Box::new(ImageFileSource::new(path.clone())),
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn print_status(handle: &SessionHandle) {
    let snapshot = handle.snapshot();
    println!(
        "state: {}  camera: {}  voice: {}  queued audio: {}",
        snapshot.state,
        if snapshot.camera_active { "on" } else { "off" },
        snapshot.config.voice,
        snapshot.playback_depth
    );
    if let Some(error) = &snapshot.error_message {
        println!("error: {}", error);
    }
    let stats = &snapshot.stats;
    println!(
        "sent: {} audio ({} bytes), {} image ({} bytes), {} text  played: {}  dropped: {} late, {} queued  decode errors: {}",
        stats.audio_frames_sent,
        stats.audio_bytes_encoded,
        stats.image_frames_sent,
        stats.image_bytes_encoded,
        stats.text_frames_sent,
        stats.chunks_played,
        stats.late_frames_dropped,
        stats.chunks_dropped,
        stats.decode_errors
    );
}

/// Forward lines from a blocking reader on its own thread
///
/// The channel closes at end of input.
fn spawn_line_reader<R>(reader: R) -> std::io::Result<mpsc::UnboundedReceiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Print assistant replies and state changes as they arrive
fn spawn_printer(handle: &SessionHandle) -> tokio::task::JoinHandle<()> {
    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        let mut last_state = ConnectionState::Idle;
        while let Ok(update) = updates.recv().await {
            match update {
                SessionUpdate::Message(message) if message.origin == Origin::Assistant => {
                    println!("assistant> {}", message.text);
                }
                SessionUpdate::Message(_) => {}
                SessionUpdate::State(snapshot) => {
                    if snapshot.state != last_state {
                        last_state = snapshot.state;
                        match &snapshot.error_message {
                            Some(error) if snapshot.state == ConnectionState::Error => {
                                println!("-- {} ({})", snapshot.state, error)
                            }
                            _ => println!("-- {}", snapshot.state),
                        }
                    }
                }
                SessionUpdate::ProtocolError(error) => {
                    println!("-- ignored bad frame: {}", error);
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args).context("invalid configuration")?;

    tracing::info!("Starting live stream client for {}", config.server.url);

    let devices = SessionDevices {
        connector: Box::new(WsConnector::new(config.server.url.clone())),
        microphone: Box::new(CpalMicrophone::new(config.audio.input_device.clone())),
        speaker: Box::new(CpalSpeaker::new(config.audio.output_device.clone())),
        camera: camera_for(&config.video.source),
    };

    let (runner, handle) = SessionRunner::new(SessionOptions::from(&config), devices);
    let session_task = tokio::spawn(runner.run());

    if config.ui.enabled {
        let web_server = WebServer::new(config.ui.clone(), handle.clone());
        let _web_handle = web_server.start_background();
        tracing::info!(
            "Control API available at http://{}:{}",
            config.ui.bind_address,
            config.ui.http_port
        );
    }

    let printer = spawn_printer(&handle);

    println!("Commands: /start /stop /camera /devices /status /quit; anything else is sent as text");

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let result = match parse_command(&line) {
            None => continue,
            Some(Command::Start) => handle.start_stream().await,
            Some(Command::Stop) => handle.stop_stream().await,
            Some(Command::Camera) => handle.toggle_camera().await,
            Some(Command::Devices) => {
                print_devices();
                Ok(())
            }
            Some(Command::Status) => {
                print_status(&handle);
                Ok(())
            }
            Some(Command::Quit) => break,
            Some(Command::Text(text)) => {
                if handle.snapshot().state != ConnectionState::Streaming {
                    println!("-- not streaming, /start first");
                }
                handle.send_text(text).await
            }
            Some(Command::Unknown(command)) => {
                println!("-- unknown command {}", command);
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("-- {}", e);
        }
    }

    tracing::info!("Shutting down");
    handle.shutdown().await?;
    session_task.await?;
    printer.abort();
    Ok(())
}
