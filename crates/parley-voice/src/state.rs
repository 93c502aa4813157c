//! Conversation state machine.
//!
//! The four user-visible states and the only transitions between them.
//! Inputs that don't match a row of the table leave the state unchanged.
//!
//! | Input | From | To |
//! |---|---|---|
//! | `SessionStarted` | Idle | Listening |
//! | `UserStartedSpeaking` | any | Listening |
//! | `AgentThinking` | Listening | Thinking |
//! | `AgentStartedSpeaking` | Thinking, Listening | Speaking |
//! | `PlaybackStarted` | Thinking, Listening (agent turn open) | Speaking |
//! | `PlaybackIdle` | Speaking | Listening |
//! | `Stopped` | any | Idle |
//!
//! An agent turn opens on `AgentStartedSpeaking` and closes on barge-in, on
//! stop, or when playback drains after `AgentAudioDone`. If playback drains
//! early (the next piece of the reply hasn't arrived yet) the state drops
//! to Listening and returns to Speaking when the next chunk starts.

use serde::{Deserialize, Serialize};

/// Current state of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No session (not started, stopped, or failed).
    #[default]
    Idle,
    /// Session live; waiting for or hearing the user.
    Listening,
    /// The agent is preparing a reply.
    Thinking,
    /// Agent speech is playing.
    Speaking,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Something that may move the conversation to a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInput {
    /// The agent acknowledged the session configuration.
    SessionStarted,
    UserStartedSpeaking,
    AgentThinking,
    AgentStartedSpeaking,
    /// The agent has sent all audio for its reply.
    AgentAudioDone,
    /// A chunk of agent speech began playing.
    PlaybackStarted,
    /// The playback queue drained with nothing left to play.
    PlaybackIdle,
    /// Session stopped or failed.
    Stopped,
}

#[derive(Debug, Default)]
pub struct ConversationStateMachine {
    state: ConversationState,
    agent_turn: bool,
    audio_done: bool,
}

impl ConversationStateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            agent_turn: false,
            audio_done: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConversationState {
        self.state
    }

    /// Whether the agent is mid-reply.
    #[must_use]
    pub const fn agent_turn(&self) -> bool {
        self.agent_turn
    }

    fn track_turn(&mut self, input: StateInput) {
        match input {
            StateInput::AgentStartedSpeaking => {
                self.agent_turn = true;
                self.audio_done = false;
            }
            StateInput::AgentAudioDone => self.audio_done = self.agent_turn,
            StateInput::PlaybackIdle if self.audio_done => {
                self.agent_turn = false;
                self.audio_done = false;
            }
            StateInput::UserStartedSpeaking | StateInput::Stopped => {
                self.agent_turn = false;
                self.audio_done = false;
            }
            _ => {}
        }
    }

    /// Apply an input. Returns the new state if it changed.
    pub fn apply(&mut self, input: StateInput) -> Option<ConversationState> {
        use ConversationState as S;

        // Playback is checked against the turn as it was before this input.
        let resuming = self.agent_turn;
        self.track_turn(input);

        let next = match (input, self.state) {
            (StateInput::SessionStarted, S::Idle) => S::Listening,
            (StateInput::UserStartedSpeaking, _) => S::Listening,
            (StateInput::AgentThinking, S::Listening) => S::Thinking,
            // Greetings are spoken without a thinking phase.
            (StateInput::AgentStartedSpeaking, S::Thinking | S::Listening) => S::Speaking,
            (StateInput::PlaybackStarted, S::Thinking | S::Listening) if resuming => S::Speaking,
            (StateInput::PlaybackIdle, S::Speaking) => S::Listening,
            (StateInput::Stopped, _) => S::Idle,
            _ => return None,
        };

        if next == self.state {
            return None;
        }

        tracing::debug!(from = %self.state, to = %next, ?input, "Conversation state transition");
        self.state = next;
        Some(next)
    }
}
