//! Voice agent wire protocol.
//!
//! Inbound text frames are JSON objects with a `type` tag. The agent
//! service has shipped several spellings for the same events over time, so
//! decoding normalizes the tag (case and `_`/`-` insensitive) and looks the
//! transcript text up under a fixed list of field aliases. Every accepted
//! message becomes one [`AgentEvent`]; anything else is a [`ProtocolError`]
//! the caller logs and drops.
//!
//! Outbound, the only JSON message is the [`SettingsMessage`] sent right
//! after the connection opens. Audio travels as binary frames.

use serde::Serialize;
use serde_json::Value;

use crate::config::{ProviderSpec, VoicePipelineConfig};

/// Fields checked for transcript text, highest priority first.
const TEXT_FIELDS: [&str; 5] = ["content", "text", "transcript", "message", "delta"];

/// Fields checked for an error description, highest priority first.
const ERROR_FIELDS: [&str; 3] = ["description", "message", "error"];

/// Who said a transcribed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Self::User),
            "assistant" | "agent" | "bot" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A decoded control message from the voice agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Connection accepted.
    Welcome { request_id: Option<String> },
    /// The settings message was accepted; the conversation can begin.
    SettingsApplied,
    /// The user began talking (barge-in trigger).
    UserStartedSpeaking,
    /// Final (`is_final`) or interim transcript text.
    Transcript {
        role: Role,
        text: String,
        is_final: bool,
    },
    AgentThinking,
    AgentStartedSpeaking,
    /// The agent has sent all audio for the current reply.
    AgentAudioDone,
    /// The agent reported a problem. The session continues.
    Error { description: String },
}

impl AgentEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::SettingsApplied => "settings_applied",
            Self::UserStartedSpeaking => "user_started_speaking",
            Self::Transcript { is_final: true, .. } => "transcript",
            Self::Transcript { .. } => "interim_transcript",
            Self::AgentThinking => "agent_thinking",
            Self::AgentStartedSpeaking => "agent_started_speaking",
            Self::AgentAudioDone => "agent_audio_done",
            Self::Error { .. } => "error",
        }
    }
}

/// Why an inbound text frame was not turned into an [`AgentEvent`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message is not an object with a string `type`")]
    MissingType,

    #[error("Unknown message type `{0}`")]
    UnknownType(String),

    #[error("`{kind}` message has no usable `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Unknown role `{0}`")]
    UnknownRole(String),
}

/// Decode one inbound text frame.
pub fn decode_event(text: &str) -> Result<AgentEvent, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match normalize_tag(tag).as_str() {
        "welcome" => Ok(AgentEvent::Welcome {
            request_id: string_field(&value, "request_id")
                .or_else(|| string_field(&value, "session_id")),
        }),
        "settingsapplied" | "settingsacknowledged" | "configurationapplied" => {
            Ok(AgentEvent::SettingsApplied)
        }
        "userstartedspeaking" | "speechstarted" => Ok(AgentEvent::UserStartedSpeaking),
        "agentthinking" => Ok(AgentEvent::AgentThinking),
        "agentstartedspeaking" => Ok(AgentEvent::AgentStartedSpeaking),
        "agentaudiodone" | "audiodone" => Ok(AgentEvent::AgentAudioDone),
        "conversationtext" | "transcript" | "finaltranscript" => {
            let is_final = value.get("is_final").and_then(Value::as_bool).unwrap_or(true);
            transcript(&value, is_final)
        }
        "interimtranscript" | "partialtranscript" => transcript(&value, false),
        "error" => Ok(AgentEvent::Error {
            description: ERROR_FIELDS
                .iter()
                .find_map(|f| string_field(&value, f))
                .unwrap_or_else(|| "unspecified error".to_string()),
        }),
        _ => Err(ProtocolError::UnknownType(tag.to_string())),
    }
}

fn transcript(value: &Value, is_final: bool) -> Result<AgentEvent, ProtocolError> {
    let role = match value.get("role").and_then(Value::as_str) {
        Some(raw) => Role::parse(raw).ok_or_else(|| ProtocolError::UnknownRole(raw.to_string()))?,
        // A finalized line must say who spoke.
        None if is_final => {
            return Err(ProtocolError::MissingField {
                kind: "transcript",
                field: "role",
            });
        }
        // Interim recognition results only ever carry the user's speech.
        None => {
            tracing::debug!("Interim transcript without role, attributing to user");
            Role::User
        }
    };

    let text = transcript_text(value).unwrap_or_default();
    if is_final && text.trim().is_empty() {
        return Err(ProtocolError::MissingField {
            kind: "transcript",
            field: "content",
        });
    }

    Ok(AgentEvent::Transcript {
        role,
        text,
        is_final,
    })
}

/// First non-empty text alias, falling back to the first recognition
/// alternative (`channel.alternatives[0].transcript`).
fn transcript_text(value: &Value) -> Option<String> {
    TEXT_FIELDS
        .iter()
        .find_map(|f| string_field(value, f))
        .or_else(|| {
            value
                .pointer("/channel/alternatives/0/transcript")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .filter(|c| !matches!(c, '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

// ── Outbound ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AudioFormat {
    encoding: &'static str,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AudioSection {
    input: AudioFormat,
    output: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ProviderSection {
    provider: ProviderSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AgentSection {
    listen: ProviderSection,
    think: ProviderSection,
    speak: ProviderSection,
    #[serde(skip_serializing_if = "String::is_empty")]
    greeting: String,
}

/// Session configuration sent once per connection, right after it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    audio: AudioSection,
    agent: AgentSection,
}

impl SettingsMessage {
    #[must_use]
    pub fn from_config(config: &VoicePipelineConfig) -> Self {
        let agent = &config.agent;
        let plain = |spec: &ProviderSpec| ProviderSection {
            provider: spec.clone(),
            prompt: None,
        };

        Self {
            kind: "Settings",
            audio: AudioSection {
                input: AudioFormat {
                    encoding: "linear16",
                    sample_rate: config.audio.capture_sample_rate,
                    container: None,
                },
                output: AudioFormat {
                    encoding: "linear16",
                    sample_rate: config.audio.playback_sample_rate,
                    container: Some("none"),
                },
            },
            agent: AgentSection {
                listen: plain(&agent.listen),
                think: ProviderSection {
                    provider: agent.think.clone(),
                    prompt: Some(agent.instructions.clone()),
                },
                speak: plain(&agent.speak),
                greeting: agent.greeting.clone(),
            },
        }
    }

    /// Serialized JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
