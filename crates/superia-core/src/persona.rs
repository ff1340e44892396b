//! Persona registry: which backend, model and instructions each character speaks through.
//!
//! Built-in personas:
//! - **superia**: generic guide of the world of Superia (fine-tuned Responses model).
//! - **laila**: Laila Snipe, answered by an Assistant with a vector-store backed novel.
//! - **boris** / **shepard**: in-world characters on fine-tuned Responses models.
//! - **sage**: low-latency voice companion over chat completions.

use crate::assistant::{AssistantClient, AssistantGenerator};
use crate::chat::ChatClient;
use crate::config::{Credentials, SuperiaConfig};
use crate::error::{CoreError, CoreResult};
use crate::generator::TextGenerator;
use crate::responses::ResponsesClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SUPERIA_GUIDE_MODEL: &str = "ft:gpt-4.1-2025-04-14:aqualabs::BYqfJkmU";
pub const SUPERIA_GUIDE_4O_MODEL: &str = "ft:gpt-4o-2024-08-06:aqualabs::BYqY3vsH";
pub const BORIS_MODEL: &str = "ft:gpt-4.1-2025-04-14:aqualabs:boris-4-mini:BfoyOqx8";
pub const SHEPARD_MODEL: &str = "ft:gpt-4.1-2025-04-14:aqualabs:shephard-4-mini:BfoYOsRT";
pub const LAILA_FINE_TUNED_ASSISTANT: &str = "asst_AGekAat0rfgHooQA5T7hpAKd";
pub const LAILA_GENERIC_ASSISTANT: &str = "asst_EkmRMaEHZpMacQe3OZiEUuOK";
pub const SAGE_CHAT_MODEL: &str = "llama-3.3-70b-versatile";

const RESPONSES_TEMPERATURE: f32 = 0.4;

const SUPERIA_GUIDE_PROMPT: &str = "You are a guide to the world of Superia. Answer as a knowledgeable \
inhabitant of the continent of Lur: the Water Clans, the Majority and Renegade Factions, Regalia, \
steam power and the Spirit Artifacts. Stay in character, speak naturally, and keep every answer \
consistent with the lore of Superia.";

const CHARACTER_PROMPT: &str = "You are {name} from the world of Superia. Respond as a knowledgeable \
inhabitant of that world. Stay in character and keep things engaging, consistent, and true to the world.";

const LAILA_PROMPT: &str = "You are Laila Snipe, the daring and playful ranger known as the Golden \
Arrow of Regalia. Speak fast, tease, drop formalities and keep your tone lively. Answer only from the \
novel in your connected vector store; search it before answering and quote it when you can. When it \
has nothing relevant, answer in character, as if the memory is hazy, never as a search engine. \
Do not invent characters, events, places or lore.";

const SAGE_PROMPT: &str = "You are Sage, a calm voice companion. Your replies are spoken aloud, so \
answer in one to three short conversational sentences without lists, markdown or emoji.";

/// Which API serves a persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersonaBackend {
    /// OpenAI Responses API with a (fine-tuned) model.
    Responses { model: String },
    /// OpenAI-compatible chat completions (`chat_api_base`).
    Chat { model: String },
    /// OpenAI Assistant run on a persistent thread.
    Assistant { assistant_id: String },
}

impl PersonaBackend {
    pub fn describe(&self) -> String {
        match self {
            PersonaBackend::Responses { model } => format!("responses:{}", model),
            PersonaBackend::Chat { model } => format!("chat:{}", model),
            PersonaBackend::Assistant { assistant_id } => format!("assistant:{}", assistant_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub display_name: String,
    pub backend: PersonaBackend,
    pub instructions: String,
    pub temperature: f32,
    /// Preferred speech voice, if the persona has one.
    pub voice: Option<String>,
}

impl Persona {
    fn character(id: &str, display_name: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            backend: PersonaBackend::Responses {
                model: model.to_string(),
            },
            instructions: CHARACTER_PROMPT.replace("{name}", display_name),
            temperature: RESPONSES_TEMPERATURE,
            voice: None,
        }
    }

    /// Same persona on a different backend (used for fine-tuned vs generic comparison).
    pub fn with_backend(mut self, backend: PersonaBackend) -> Self {
        self.backend = backend;
        self
    }
}

/// Lookup table of personas. Ids are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaRegistry {
    pub fn builtin() -> Self {
        let personas = vec![
            Persona {
                id: "superia".to_string(),
                display_name: "Superia Guide".to_string(),
                backend: PersonaBackend::Responses {
                    model: SUPERIA_GUIDE_MODEL.to_string(),
                },
                instructions: SUPERIA_GUIDE_PROMPT.to_string(),
                temperature: RESPONSES_TEMPERATURE,
                voice: Some("fable".to_string()),
            },
            Persona {
                id: "laila".to_string(),
                display_name: "Laila".to_string(),
                backend: PersonaBackend::Assistant {
                    assistant_id: LAILA_FINE_TUNED_ASSISTANT.to_string(),
                },
                instructions: LAILA_PROMPT.to_string(),
                temperature: 0.7,
                voice: Some("nova".to_string()),
            },
            Persona::character("boris", "Boris", BORIS_MODEL),
            Persona::character("shepard", "Shepard", SHEPARD_MODEL),
            Persona {
                id: "sage".to_string(),
                display_name: "Sage".to_string(),
                backend: PersonaBackend::Chat {
                    model: SAGE_CHAT_MODEL.to_string(),
                },
                instructions: SAGE_PROMPT.to_string(),
                temperature: 0.7,
                voice: Some("alloy".to_string()),
            },
        ];
        Self { personas }
    }

    pub fn get(&self, id: &str) -> CoreResult<&Persona> {
        let id = id.trim();
        self.personas
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| CoreError::UnknownPersona(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    /// Add or replace a persona by id.
    pub fn insert(&mut self, persona: Persona) {
        match self
            .personas
            .iter_mut()
            .find(|p| p.id.eq_ignore_ascii_case(&persona.id))
        {
            Some(existing) => *existing = persona,
            None => self.personas.push(persona),
        }
    }
}

/// Construct the client serving `persona`. Credentials are checked here, before any request.
pub fn build_generator(
    persona: &Persona,
    config: &SuperiaConfig,
    credentials: &Credentials,
) -> CoreResult<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match &persona.backend {
        PersonaBackend::Responses { model } => Arc::new(
            ResponsesClient::from_config(config, credentials, model.clone())?
                .with_instructions(persona.instructions.clone())
                .with_temperature(persona.temperature),
        ),
        PersonaBackend::Chat { model } => Arc::new(
            ChatClient::from_config(config, credentials, model.clone())?
                .with_instructions(persona.instructions.clone())
                .with_temperature(persona.temperature),
        ),
        PersonaBackend::Assistant { assistant_id } => Arc::new(
            AssistantGenerator::new(
                AssistantClient::from_config(config, credentials)?,
                assistant_id.clone(),
            )
            .with_instructions(persona.instructions.clone())
            .with_temperature(persona.temperature),
        ),
    };
    Ok(generator)
}
