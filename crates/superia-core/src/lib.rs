//! Superia core: configuration, persona registry and the text-generation clients
//! (Responses, chat completions, Assistant threads) the voice loop and console speak through.

pub mod assistant;
pub mod chat;
pub mod compare;
pub mod config;
pub mod error;
pub mod generator;
pub mod persona;
pub mod responses;

pub use assistant::{AssistantClient, AssistantGenerator, AssistantThread, Run};
pub use chat::ChatClient;
pub use compare::{compare, ComparisonOutcome};
pub use config::{env_bool, env_opt_string, Credentials, PollPolicy, SuperiaConfig};
pub use error::{CoreError, CoreResult};
pub use generator::{Generation, TextGenerator, TokenUsage};
pub use persona::{build_generator, Persona, PersonaBackend, PersonaRegistry};
pub use responses::ResponsesClient;
