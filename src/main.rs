use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use live_voice_client::core::audio::MicrophoneSource;
use live_voice_client::core::live::{LiveEvent, LiveEventKind, ResponseModality};
use live_voice_client::core::{AudioRecorder, LiveClient};
use live_voice_client::{ClientSettings, PlaybackBackend, SessionOptions, VoiceSession};

/// Live voice client - talk to a generative model over a live WebSocket session
#[derive(Parser, Debug)]
#[command(name = "live-voice-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ask the model for text responses instead of audio
    #[arg(long = "text-only")]
    text_only: bool,

    /// Text turn sent after the session is set up
    #[arg(short = 'g', long = "greeting")]
    greeting: Option<String>,

    /// Keep the microphone off after connecting
    #[arg(long = "muted")]
    muted: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio input and output devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be installed before the first wss connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::Devices) = cli.command {
        return list_devices();
    }

    let mut settings = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientSettings::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientSettings::from_env().map_err(|e| anyhow!(e.to_string()))?
    };
    if cli.text_only {
        settings.response_modality = ResponseModality::Text;
    }
    if cli.greeting.is_some() {
        settings.greeting = cli.greeting.clone();
    }

    let client = LiveClient::with_options(settings.endpoint(), settings.client_options());
    let _console = subscribe_console(&client);

    let recorder = Arc::new(AudioRecorder::new(microphone(&settings)));
    let session = VoiceSession::new(
        client,
        recorder,
        playback_backend(&settings),
        SessionOptions {
            greeting: settings.greeting.clone(),
            playback_volume: settings.playback_volume,
            ..Default::default()
        },
    );
    session.set_config(settings.live_config());

    info!(model = %settings.model, "Connecting");
    session.connect().await?;

    if !cli.muted && settings.response_modality == ResponseModality::Audio {
        if let Err(e) = session.toggle_mute().await {
            warn!(error = %e, "Microphone unavailable, continuing with text input");
        }
    }

    println!("Connected. Type a message and press enter. /mute toggles the microphone, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => break,
                    "/mute" => match session.toggle_mute().await {
                        Ok(true) => println!("[microphone off]"),
                        Ok(false) => println!("[microphone on]"),
                        Err(e) => println!("[microphone error: {e}]"),
                    },
                    "/status" => println!("{:?}", session.status()),
                    text => {
                        if !session.client().is_connected() {
                            println!("[reconnecting]");
                            session.connect().await?;
                        }
                        session.send_text(text)?;
                    }
                }
            }
        }
    }

    session.disconnect();
    info!("Session ended");
    Ok(())
}

/// Print model text, tool calls and connection changes to the console.
fn subscribe_console(client: &LiveClient) -> Vec<live_voice_client::core::Subscription> {
    vec![
        client.on(LiveEventKind::Content, |event| {
            if let LiveEvent::Content(content) = event
                && let Some(turn) = &content.model_turn
            {
                for text in turn.parts.iter().filter_map(|p| p.text.as_deref()) {
                    println!("model> {text}");
                }
            }
        }),
        client.on(LiveEventKind::Interrupted, |_| println!("[interrupted]")),
        client.on(LiveEventKind::ToolCall, |event| {
            if let LiveEvent::ToolCall(call) = event {
                for f in &call.function_calls {
                    println!("[tool call {} ({})]", f.name, f.id);
                }
            }
        }),
        client.on(LiveEventKind::Close, |event| {
            if let LiveEvent::Close(close) = event {
                println!("[closed: {}]", close.reason);
            }
        }),
        client.on(LiveEventKind::ProtocolError, |event| {
            if let LiveEvent::ProtocolError(e) = event {
                warn!(error = %e, "Protocol error");
            }
        }),
        client.on(LiveEventKind::TransportError, |event| {
            if let LiveEvent::TransportError(e) = event {
                warn!(error = %e, "Transport error");
            }
        }),
        client.on(LiveEventKind::Log, |event| {
            if let LiveEvent::Log(log) = event {
                debug!("{log}");
            }
        }),
    ]
}

#[cfg(feature = "device-audio")]
fn list_devices() -> anyhow::Result<()> {
    use live_voice_client::core::audio::{list_input_devices, list_output_devices};

    println!("Input devices:");
    for name in list_input_devices()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in list_output_devices()? {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(not(feature = "device-audio"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("built without the `device-audio` feature")
}

#[cfg(feature = "device-audio")]
fn microphone(settings: &ClientSettings) -> Arc<dyn MicrophoneSource> {
    Arc::new(live_voice_client::core::audio::CpalMicrophone::new(
        settings.input_device.clone(),
    ))
}

#[cfg(not(feature = "device-audio"))]
fn microphone(_settings: &ClientSettings) -> Arc<dyn MicrophoneSource> {
    Arc::new(NoMicrophone)
}

#[cfg(feature = "device-audio")]
fn playback_backend(settings: &ClientSettings) -> Arc<dyn PlaybackBackend> {
    Arc::new(live_voice_client::DeviceBackend::new(
        settings.output_device.clone(),
    ))
}

#[cfg(not(feature = "device-audio"))]
fn playback_backend(_settings: &ClientSettings) -> Arc<dyn PlaybackBackend> {
    Arc::new(live_voice_client::HeadlessBackend::default())
}

#[cfg(not(feature = "device-audio"))]
struct NoMicrophone;

#[cfg(not(feature = "device-audio"))]
#[async_trait::async_trait]
impl MicrophoneSource for NoMicrophone {
    async fn open(
        &self,
        _constraints: &live_voice_client::core::audio::CaptureConstraints,
    ) -> live_voice_client::core::AudioResult<live_voice_client::core::audio::MicrophoneStream>
    {
        Err(live_voice_client::core::AudioError::DeviceUnavailable(
            "built without the `device-audio` feature".to_string(),
        ))
    }
}
