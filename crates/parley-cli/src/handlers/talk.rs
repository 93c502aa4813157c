//! `talk` command handler: one live conversation until Ctrl-C.

use std::sync::Arc;

use parley_voice::credentials::DEFAULT_AGENT_URL;
use parley_voice::{
    AgentCredentials, CredentialSource, EnvCredentials, SessionStats, StaticCredentials,
    VoiceEvent, VoicePipeline,
};

use crate::commands::{OutputFormat, TalkArgs};
use crate::error::CliError;
use crate::handlers::config::{apply_overrides, load_config};
use crate::presentation::render_event;

/// Pick where the access token comes from.
///
/// An explicit `--token` wins; otherwise the environment is read at
/// connect time so reconnects pick up a refreshed token.
fn credential_source(args: &TalkArgs) -> Arc<dyn CredentialSource> {
    match &args.token {
        Some(token) => {
            let url = args.url.as_deref().unwrap_or(DEFAULT_AGENT_URL);
            Arc::new(StaticCredentials::new(AgentCredentials::new(url, token.as_str())))
        }
        None => Arc::new(EnvCredentials),
    }
}

/// Execute the talk command.
///
/// # Errors
///
/// Returns an error if the session cannot start (no microphone, missing
/// token, invalid configuration) or ends with a fatal error.
pub async fn execute(args: TalkArgs) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let (mut pipeline, mut events) = VoicePipeline::new(config, credential_source(&args));

    if let Err(e) = pipeline.start().await {
        // The fatal event is already queued; show it before exiting.
        drain(&mut events, args.format, args.meter);
        return Err(e.into());
    }

    if args.format == OutputFormat::Text {
        eprintln!("Talking. Press Ctrl-C to hang up.");
    }

    let mut failure = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("Interrupted by user");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = render_event(&event, args.format, args.meter) {
                    line.print();
                }
                if let VoiceEvent::Error { message, fatal: true } = event {
                    failure = Some(message);
                    break;
                }
            }
        }
    }

    pipeline.stop().await;
    drain(&mut events, args.format, args.meter);

    if args.format == OutputFormat::Text {
        print_summary(&pipeline.stats());
    }

    match failure {
        Some(message) => Err(CliError::SessionFailed(message)),
        None => Ok(()),
    }
}

fn drain(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<VoiceEvent>,
    format: OutputFormat,
    meter: bool,
) {
    while let Ok(event) = events.try_recv() {
        if let Some(line) = render_event(&event, format, meter) {
            line.print();
        }
    }
}

fn print_summary(stats: &SessionStats) {
    eprintln!();
    eprintln!(
        "{} transcript line(s), {} reply chunk(s) played, {} interruption(s)",
        stats.transcripts, stats.chunks_played, stats.interruptions
    );
    eprintln!(
        "sent {} frame(s) ({} bytes), received {} bytes of audio, {} reconnect(s)",
        stats.transport.audio_frames_sent,
        stats.transport.audio_bytes_sent,
        stats.transport.audio_bytes_received,
        stats.transport.reconnects
    );
}
