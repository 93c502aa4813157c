//! Connection credentials for the voice agent.
//!
//! A [`CredentialSource`] is asked for a fresh URL + token before every
//! connection attempt, so short-lived tokens minted by a backend keep
//! working across reconnects.

use async_trait::async_trait;

use crate::error::VoiceError;

/// Default voice agent endpoint.
pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// Environment variable holding the agent endpoint.
pub const AGENT_URL_ENV: &str = "PARLEY_AGENT_URL";

/// Environment variables checked (in order) for the access token.
pub const AGENT_TOKEN_ENVS: [&str; 2] = ["PARLEY_AGENT_TOKEN", "DEEPGRAM_API_KEY"];

/// Where and how to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentCredentials {
    pub url: String,
    pub token: String,
}

impl AgentCredentials {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Produces credentials on demand.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<AgentCredentials, VoiceError>;
}

/// Fixed credentials (CLI flags, tests).
#[derive(Debug, Clone)]
pub struct StaticCredentials(AgentCredentials);

impl StaticCredentials {
    #[must_use]
    pub const fn new(credentials: AgentCredentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self) -> Result<AgentCredentials, VoiceError> {
        if self.0.token.trim().is_empty() {
            return Err(VoiceError::Credentials("access token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// Reads credentials from the process environment on every fetch.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn fetch(&self) -> Result<AgentCredentials, VoiceError> {
        let url = std::env::var(AGENT_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string());

        let token = AGENT_TOKEN_ENVS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                VoiceError::Credentials(format!(
                    "no access token; set {}",
                    AGENT_TOKEN_ENVS.join(" or ")
                ))
            })?;

        Ok(AgentCredentials { url, token })
    }
}
