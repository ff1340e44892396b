//! Superia configuration loaded from TOML, environment, and `.env`.
//!
//! Precedence: env `SUPERIA_*` > file (`SUPERIA_CONFIG` path, default `config/superia.toml`) > defaults.
//! Credentials are never read from the TOML file; they come from the environment only.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Workspace configuration shared by the console and the voice loop.
///
/// | Key (env `SUPERIA_<KEY>`) | Default | Description |
/// |-----|---------|--------------|
/// | openai_api_base | https://api.openai.com/v1 | Responses, Assistants, speech and transcription endpoints. |
/// | chat_api_base | https://api.groq.com/openai/v1 | OpenAI-compatible chat completions endpoint. |
/// | default_persona | sage | Persona used when none is given. |
/// | poll_initial_ms | 1000 | First assistant run poll delay. |
/// | poll_max_ms | 8000 | Backoff cap for assistant run polling. |
/// | poll_deadline_secs | 120 | Give up on a run after this long. |
/// | tts_model / tts_voice | tts-1 / alloy | Remote speech synthesis. |
/// | stt_model | whisper-1 | Remote transcription for microphone segments. |
/// | relay_url | ws://localhost:8003 | Realtime transcription relay. |
/// | words_per_minute | 170 | Speaking rate of the simulated speaker. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperiaConfig {
    pub openai_api_base: String,
    pub chat_api_base: String,
    pub default_persona: String,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub poll_deadline_secs: u64,
    pub tts_model: String,
    pub tts_voice: String,
    pub stt_model: String,
    pub relay_url: String,
    pub words_per_minute: u32,
}

impl Default for SuperiaConfig {
    fn default() -> Self {
        Self {
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            chat_api_base: DEFAULT_CHAT_API_BASE.to_string(),
            default_persona: "sage".to_string(),
            poll_initial_ms: 1000,
            poll_max_ms: 8000,
            poll_deadline_secs: 120,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            stt_model: "whisper-1".to_string(),
            relay_url: "ws://localhost:8003".to_string(),
            words_per_minute: 170,
        }
    }
}

impl SuperiaConfig {
    /// Load config from file and environment. Precedence: env `SUPERIA_CONFIG` path > `config/superia.toml` > defaults.
    pub fn load() -> CoreResult<Self> {
        let config_path =
            std::env::var("SUPERIA_CONFIG").unwrap_or_else(|_| "config/superia.toml".to_string());
        Self::load_from(Some(Path::new(&config_path)))
    }

    /// Load with an explicit file (skipped when it does not exist), then env overrides.
    pub fn load_from(path: Option<&Path>) -> CoreResult<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("openai_api_base", defaults.openai_api_base)?
            .set_default("chat_api_base", defaults.chat_api_base)?
            .set_default("default_persona", defaults.default_persona)?
            .set_default("poll_initial_ms", defaults.poll_initial_ms as i64)?
            .set_default("poll_max_ms", defaults.poll_max_ms as i64)?
            .set_default("poll_deadline_secs", defaults.poll_deadline_secs as i64)?
            .set_default("tts_model", defaults.tts_model)?
            .set_default("tts_voice", defaults.tts_voice)?
            .set_default("stt_model", defaults.stt_model)?
            .set_default("relay_url", defaults.relay_url)?
            .set_default("words_per_minute", defaults.words_per_minute as i64)?;

        let builder = match path {
            Some(p) if p.exists() => builder.add_source(config::File::from(p)),
            _ => builder,
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("SUPERIA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.poll_initial_ms == 0 {
            return Err(CoreError::Config("poll_initial_ms must be positive".to_string()));
        }
        if self.poll_max_ms < self.poll_initial_ms {
            return Err(CoreError::Config(format!(
                "poll_max_ms ({}) must be >= poll_initial_ms ({})",
                self.poll_max_ms, self.poll_initial_ms
            )));
        }
        if self.words_per_minute == 0 {
            return Err(CoreError::Config("words_per_minute must be positive".to_string()));
        }
        Ok(())
    }

    /// The effective configuration as a TOML document (the format `load` reads back).
    pub fn to_toml(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial: Duration::from_millis(self.poll_initial_ms),
            max: Duration::from_millis(self.poll_max_ms),
            deadline: Duration::from_secs(self.poll_deadline_secs),
        }
    }
}

/// Capped exponential backoff with an overall deadline for assistant run polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        SuperiaConfig::default().poll_policy()
    }
}

impl PollPolicy {
    /// Delay before poll number `attempt` (0-based): initial * 2^attempt, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// API keys, read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// OPENAI_API_KEY (or the legacy NEXT_PUBLIC_OPENAI_API_KEY).
    pub openai_api_key: Option<String>,
    /// CHAT_API_KEY, then GROQ_API_KEY.
    pub chat_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_opt_string("OPENAI_API_KEY")
                .or_else(|| env_opt_string("NEXT_PUBLIC_OPENAI_API_KEY")),
            chat_api_key: env_opt_string("CHAT_API_KEY").or_else(|| env_opt_string("GROQ_API_KEY")),
        }
    }

    pub fn require_openai(&self) -> CoreResult<String> {
        self.openai_api_key.clone().ok_or_else(|| {
            CoreError::MissingCredential(
                "OpenAI API key is required. Set OPENAI_API_KEY in the environment or .env".to_string(),
            )
        })
    }

    pub fn require_chat(&self) -> CoreResult<String> {
        self.chat_api_key.clone().ok_or_else(|| {
            CoreError::MissingCredential(
                "Chat API key is required. Set CHAT_API_KEY or GROQ_API_KEY".to_string(),
            )
        })
    }
}

/// `true`/`false` toggle from the environment. Unset or empty => `default`.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

/// Trimmed, non-empty env value.
pub fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
