use anyhow::{Context, Result};
use clap::Parser;
use nutri_voice::audio::AudioSource;
use nutri_voice::session::ConsoleRenderer;
use nutri_voice::{ChatSession, Config, SessionCommand, SessionConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nutri-voice")]
#[command(about = "Voice and text chat with the nutrition companion")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/nutri-voice")]
    config: String,

    /// WebSocket URL of the companion service
    #[arg(short, long)]
    url: Option<String>,

    /// Capture from a 16-bit WAV file instead of the microphone
    #[arg(long)]
    input_wav: Option<String>,

    /// Discard assistant audio
    #[arg(long)]
    mute: bool,
}

const HELP: &str = "Type a message and press enter. Commands: /talk /stop /interrupt /connect /disconnect /bg /fg /quit";

fn parse_line(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    match line {
        "" => None,
        "/talk" => Some(SessionCommand::StartSpeaking),
        "/stop" => Some(SessionCommand::StopSpeaking),
        "/interrupt" => Some(SessionCommand::Interrupt),
        "/connect" => Some(SessionCommand::Connect),
        "/disconnect" => Some(SessionCommand::Disconnect),
        "/bg" => Some(SessionCommand::SetForeground(false)),
        "/fg" => Some(SessionCommand::SetForeground(true)),
        "/quit" | "/exit" => Some(SessionCommand::Quit),
        text => Some(SessionCommand::SendText(text.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config).context("Failed to load config")?;
    if let Some(url) = cli.url {
        cfg.service.url = url;
    }
    if cli.mute {
        cfg.playback.muted = true;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Service: {}", cfg.service.url);

    let source = match cli.input_wav {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };

    let session_config = SessionConfig::from_config(&cfg, source);
    let mut session = ChatSession::open(session_config, ConsoleRenderer::new())
        .await
        .context("Failed to set up chat session")?;
    session.connect();

    let (commands_tx, commands_rx) = mpsc::channel(32);
    let session_task = tokio::spawn(session.run(commands_rx));

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let Some(command) = parse_line(&line) else {
            continue;
        };
        let quit = command == SessionCommand::Quit;
        if commands_tx.send(command).await.is_err() || quit {
            break;
        }
    }
    drop(commands_tx);

    let stats = session_task.await.context("Session task failed")?;
    info!(
        "Session {} ended after {:.1}s: {} turns, {} audio batches sent, {} fragments played ({} skipped), {} reconnects",
        stats.session_id,
        stats.duration_secs,
        stats.turns_completed,
        stats.batches_sent,
        stats.fragments_played,
        stats.fragments_skipped,
        stats.reconnects
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  "), None);
        assert_eq!(parse_line("/talk"), Some(SessionCommand::StartSpeaking));
        assert_eq!(parse_line("/quit"), Some(SessionCommand::Quit));
        assert_eq!(
            parse_line(" is oatmeal healthy? "),
            Some(SessionCommand::SendText("is oatmeal healthy?".to_string()))
        );
    }
}
