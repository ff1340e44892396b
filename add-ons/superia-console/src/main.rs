//! Superia console
//!
//! Terminal front-end for the Superia personas: one-shot chat, side-by-side model
//! comparison, and a voice conversation with barge-in (typed lines stand in for the
//! microphone unless built with `--features audio`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use superia_core::persona::{LAILA_GENERIC_ASSISTANT, SUPERIA_GUIDE_4O_MODEL};
use superia_core::{
    build_generator, compare, Credentials, Persona, PersonaBackend, PersonaRegistry,
    SuperiaConfig, TextGenerator,
};
use superia_voice::{
    BargeInCoordinator, ControlCommand, ControlSender, ManualFeed, ManualRecognizer, PlaybackSink,
    RecognitionEngine, SpeechSynthesizer, TextOnlySynthesizer, TimedPlayback, VoiceBackends,
    VoiceNotice, VoiceSettings,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "superia", version, about = "Talk to the people of Superia")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as TOML.
    Config,
    /// List the built-in personas.
    Personas {
        #[arg(long)]
        json: bool,
    },
    /// Ask a persona one question.
    Chat {
        #[arg(long, short)]
        persona: Option<String>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Send the same question to several personas or models at once.
    Compare {
        /// Repeat to compare several personas. A single persona is compared with its generic model.
        #[arg(long = "persona", short)]
        personas: Vec<String>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Voice conversation with barge-in.
    Talk {
        #[arg(long, short)]
        persona: Option<String>,
        /// Listen on the microphone (needs `--features audio`).
        #[arg(long)]
        mic: bool,
        /// Stream the microphone to the transcription relay (needs `--features relay`).
        #[arg(long, conflicts_with = "mic")]
        relay: bool,
        /// Speak replies through the speaker (needs `--features audio`).
        #[arg(long)]
        speak: bool,
        #[arg(long)]
        muted: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[superia] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = SuperiaConfig::load().context("loading Superia configuration")?;
    let credentials = Credentials::from_env();
    let registry = PersonaRegistry::builtin();

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Personas { json } => list_personas(&registry, json),
        Command::Chat { persona, text } => {
            let persona = registry.get(persona.as_deref().unwrap_or(&config.default_persona))?;
            let generator = build_generator(persona, &config, &credentials)?;
            let reply = generator.generate(&text.join(" ")).await?;
            println!("{}: {}", persona.display_name, reply.text);
            if let Some(usage) = reply.usage {
                tracing::info!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
            Ok(())
        }
        Command::Compare { personas, text } => {
            let generators = comparison_generators(&registry, &config, &credentials, &personas)?;
            for outcome in compare(&text.join(" "), &generators).await {
                println!("== {} ({:.1}s) ==", outcome.label, outcome.elapsed.as_secs_f32());
                println!("{}\n", outcome.display_text());
            }
            Ok(())
        }
        Command::Talk {
            persona,
            mic,
            relay,
            speak,
            muted,
        } => {
            let persona = registry.get(persona.as_deref().unwrap_or(&config.default_persona))?;
            let options = TalkOptions {
                mic,
                relay,
                speak,
                muted,
            };
            talk(persona, &config, &credentials, options).await
        }
    }
}

fn list_personas(registry: &PersonaRegistry, json: bool) -> anyhow::Result<()> {
    if json {
        let all: Vec<&Persona> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    for persona in registry.iter() {
        println!(
            "{:<10} {:<16} {}",
            persona.id,
            persona.display_name,
            persona.backend.describe()
        );
    }
    Ok(())
}

/// The generic-model counterpart of a fine-tuned persona, for A/B comparison.
fn generic_counterpart(persona: &Persona) -> Option<Persona> {
    let backend = match persona.id.as_str() {
        "superia" => PersonaBackend::Responses {
            model: SUPERIA_GUIDE_4O_MODEL.to_string(),
        },
        "laila" => PersonaBackend::Assistant {
            assistant_id: LAILA_GENERIC_ASSISTANT.to_string(),
        },
        _ => return None,
    };
    Some(persona.clone().with_backend(backend))
}

fn comparison_generators(
    registry: &PersonaRegistry,
    config: &SuperiaConfig,
    credentials: &Credentials,
    ids: &[String],
) -> anyhow::Result<Vec<Arc<dyn TextGenerator>>> {
    let mut personas: Vec<Persona> = Vec::new();
    if ids.len() <= 1 {
        let id = ids.first().map(String::as_str).unwrap_or("superia");
        let persona = registry.get(id)?.clone();
        let generic = generic_counterpart(&persona)
            .with_context(|| format!("{} has no generic model to compare against", persona.id))?;
        personas.push(persona);
        personas.push(generic);
    } else {
        for id in ids {
            personas.push(registry.get(id)?.clone());
        }
    }
    personas
        .iter()
        .map(|p| build_generator(p, config, credentials).map_err(anyhow::Error::from))
        .collect()
}

struct TalkOptions {
    mic: bool,
    relay: bool,
    speak: bool,
    muted: bool,
}

async fn talk(
    persona: &Persona,
    config: &SuperiaConfig,
    credentials: &Credentials,
    options: TalkOptions,
) -> anyhow::Result<()> {
    let generator = build_generator(persona, config, credentials)?;
    let mut settings = VoiceSettings::from_env();
    settings.start_muted |= options.muted;

    let (synthesizer, playback) = speech_output(persona, config, credentials, options.speak)?;
    let (recognizer, feed) = speech_input(config, credentials, &settings, &options)?;

    let (mut coordinator, notices) = BargeInCoordinator::new(
        settings,
        VoiceBackends {
            generator,
            synthesizer,
            recognizer,
            playback,
        },
    );
    let events = coordinator.controls();

    println!(
        "Talking to {}. Type to speak; /mute /unmute /stop /start /cancel /quit.",
        persona.display_name
    );
    tokio::spawn(print_notices(persona.display_name.clone(), notices));
    tokio::spawn(read_commands(events.clone(), feed));
    events.send(ControlCommand::StartRecording)?;

    tokio::select! {
        _ = coordinator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; ending conversation");
        }
    }

    println!("\n--- conversation ({} entries) ---", coordinator.history().len());
    for entry in coordinator.history().iter() {
        println!(
            "[{}] {}: {}",
            entry.timestamp().format("%H:%M:%S"),
            entry.role().label(),
            entry.content()
        );
    }
    Ok(())
}

type Output = (Arc<dyn SpeechSynthesizer>, Box<dyn PlaybackSink>);

fn speech_output(
    persona: &Persona,
    config: &SuperiaConfig,
    credentials: &Credentials,
    speak: bool,
) -> anyhow::Result<Output> {
    if !speak {
        return Ok((
            Arc::new(TextOnlySynthesizer),
            Box::new(TimedPlayback::new(config.words_per_minute)),
        ));
    }
    #[cfg(feature = "audio")]
    {
        let voice = persona.voice.clone().unwrap_or_else(|| config.tts_voice.clone());
        let synthesizer =
            superia_voice::SpeechApiSynthesizer::from_config(config, credentials)?.with_voice(voice);
        let speaker = superia_voice::RodioPlayback::new()?;
        Ok((Arc::new(synthesizer), Box::new(speaker)))
    }
    #[cfg(not(feature = "audio"))]
    {
        let _ = (persona, credentials);
        anyhow::bail!("--speak needs a build with `--features audio`")
    }
}

type Input = (Box<dyn RecognitionEngine>, Option<ManualFeed>);

fn speech_input(
    config: &SuperiaConfig,
    credentials: &Credentials,
    settings: &VoiceSettings,
    options: &TalkOptions,
) -> anyhow::Result<Input> {
    if options.relay {
        #[cfg(feature = "relay")]
        {
            let _ = (credentials, settings);
            let relay = superia_voice::RelayRecognizer::new(config.relay_url.clone());
            return Ok((Box::new(relay), None));
        }
        #[cfg(not(feature = "relay"))]
        anyhow::bail!("--relay needs a build with `--features relay`");
    }
    if options.mic {
        #[cfg(feature = "audio")]
        {
            let stt = superia_voice::TranscriptionApi::from_config(config, credentials)?
                .with_language(&settings.recognition.language);
            let mic = superia_voice::MicRecognizer::new(Arc::new(stt));
            return Ok((Box::new(mic), None));
        }
        #[cfg(not(feature = "audio"))]
        anyhow::bail!("--mic needs a build with `--features audio`");
    }
    let _ = (config, credentials, settings);
    let (recognizer, feed) = ManualRecognizer::new();
    Ok((Box::new(recognizer), Some(feed)))
}

/// Typed lines: slash commands become controls, anything else is spoken text.
async fn read_commands(events: ControlSender, feed: Option<ManualFeed>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        let line = line.trim();
        let command = match line {
            "" => continue,
            "/mute" => Some(ControlCommand::SetMuted(true)),
            "/unmute" => Some(ControlCommand::SetMuted(false)),
            "/start" => Some(ControlCommand::StartRecording),
            "/stop" => Some(ControlCommand::StopRecording),
            "/cancel" => Some(ControlCommand::Cancel),
            "/quit" | "/exit" => Some(ControlCommand::Shutdown),
            _ => None,
        };
        if let Some(command) = command {
            let quit = command == ControlCommand::Shutdown;
            if let Err(e) = events.send(command) {
                tracing::warn!(error = %e, "Control not delivered");
                return;
            }
            if quit {
                return;
            }
            continue;
        }
        match &feed {
            Some(feed) => {
                if let Some(partial) = line.strip_prefix("/interim ") {
                    feed.interim(partial);
                } else if !feed.say(line) {
                    println!("(not listening; /start to resume)");
                }
            }
            None => println!("(the microphone is listening; only commands are read here)"),
        }
    }
    let _ = events.send(ControlCommand::Shutdown);
}

async fn print_notices(name: String, mut notices: mpsc::UnboundedReceiver<VoiceNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            VoiceNotice::StateChanged { to, .. } => println!("  [{}]", to),
            VoiceNotice::MuteChanged(muted) => {
                println!("  [{}]", if muted { "muted" } else { "unmuted" })
            }
            VoiceNotice::RecordingChanged(on) => {
                println!("  [recording {}]", if on { "on" } else { "off" })
            }
            VoiceNotice::TurnStarted { input, .. } => println!("you: {}", input),
            VoiceNotice::ResponseReady { text, .. } => println!("{}: {}", name, text),
            VoiceNotice::TurnCancelled { turn } => println!("  ({} cancelled)", turn),
            VoiceNotice::TurnFailed { error, .. } => println!("  (failed: {})", error),
            VoiceNotice::Error(message) => println!("  (error: {})", message),
            VoiceNotice::TranscriptUpdated(_)
            | VoiceNotice::PlaybackStarted { .. }
            | VoiceNotice::HistoryAppended(_)
            | VoiceNotice::RecognitionRestarted { .. } => {}
        }
    }
}
