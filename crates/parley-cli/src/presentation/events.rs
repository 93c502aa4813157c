//! One line of output per [`VoiceEvent`].

use chrono::Local;
use parley_voice::{ConnectionStatus, Role, VoiceEvent};

use crate::commands::OutputFormat;

const METER_WIDTH: usize = 30;

/// Where a rendered line goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Stdout(String),
    Stderr(String),
}

impl Line {
    pub fn print(&self) {
        match self {
            Self::Stdout(s) => println!("{s}"),
            Self::Stderr(s) => eprintln!("{s}"),
        }
    }
}

/// Render an event, or `None` when it should not be shown.
///
/// Telemetry is only shown with `meter`; waveforms never in text mode.
#[must_use]
pub fn render_event(event: &VoiceEvent, format: OutputFormat, meter: bool) -> Option<Line> {
    let telemetry = matches!(event, VoiceEvent::AudioLevel(_) | VoiceEvent::Waveform(_));
    if telemetry && !meter {
        return None;
    }

    match format {
        OutputFormat::Json => serde_json::to_string(event).ok().map(Line::Stdout),
        OutputFormat::Text => render_text(event),
    }
}

fn render_text(event: &VoiceEvent) -> Option<Line> {
    let line = match event {
        VoiceEvent::StateChanged(state) => Line::Stdout(format!("[{state}]")),
        VoiceEvent::InterimText(text) if text.is_empty() => return None,
        VoiceEvent::InterimText(text) => Line::Stdout(format!("  ... {text}")),
        VoiceEvent::Transcript(entry) => {
            let who = match entry.role {
                Role::User => "you",
                Role::Assistant => "agent",
            };
            let at = entry.timestamp.with_timezone(&Local).format("%H:%M:%S");
            Line::Stdout(format!("{at} {who}: {}", entry.text))
        }
        VoiceEvent::Error { message, fatal: true } => Line::Stderr(format!("error: {message}")),
        VoiceEvent::Error { message, .. } => Line::Stderr(format!("warning: {message}")),
        VoiceEvent::AudioLevel(level) => Line::Stdout(meter_bar(*level)),
        VoiceEvent::Waveform(_) => return None,
        VoiceEvent::Connection(status) => Line::Stderr(connection_text(*status)),
    };
    Some(line)
}

fn connection_text(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connecting => "connecting...".to_string(),
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Reconnecting {
            attempt,
            max_attempts,
        } => format!("connection lost, reconnecting ({attempt}/{max_attempts})"),
        ConnectionStatus::Disconnected => "disconnected".to_string(),
    }
}

/// `mic [######                        ]` for a level in `[0, 1]`.
fn meter_bar(level: f32) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = (level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    format!(
        "mic [{}{}]",
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled)
    )
}
