use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use enquiry_agents::{AgentSettings, EnquiryAgent, ProviderChain, ProviderSettings};
use enquiry_core::{ChatInput, KnowledgeBase, ResponseSource};
use enquiry_ml::ClassifierKind;
use enquiry_nlp::TextNormalizer;
use enquiry_observability::{init_tracing, AppMetrics};
use enquiry_storage::MemoryContextStore;

#[derive(Debug, Parser)]
#[command(name = "enquiry")]
#[command(about = "College enquiry assistant CLI")]
struct Cli {
    /// Directory with replacement knowledge tables.
    #[arg(long, env = "ENQUIRY_KNOWLEDGE_DIR")]
    knowledge_dir: Option<PathBuf>,

    /// `weighted` or `overlap`.
    #[arg(long, value_parser = parse_classifier)]
    classifier: Option<ClassifierKind>,

    #[arg(long, env = "ENQUIRY_RNG_SEED")]
    seed: Option<u64>,

    /// Answer locally even when provider keys are configured.
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session. `/reset`, `/context` and `exit` are understood.
    Chat,
    /// Print the classification for one message.
    Classify { text: String },
    /// Print the normalized form of one message.
    Normalize { text: String },
    /// Print the opening suggestions.
    Suggestions,
}

fn parse_classifier(value: &str) -> Result<ClassifierKind, String> {
    ClassifierKind::parse(value).ok_or_else(|| format!("unknown classifier `{value}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("enquiry_cli");
    let cli = Cli::parse();

    let knowledge = KnowledgeBase::load(cli.knowledge_dir.as_deref())
        .context("failed loading knowledge tables")?;

    match cli.command {
        Command::Normalize { ref text } => {
            let normalizer = TextNormalizer::new(&knowledge.vocabulary);
            println!(
                "{}",
                serde_json::to_string_pretty(&normalizer.normalize(text))?
            );
        }
        Command::Classify { ref text } => {
            let agent = build_agent(&cli, &knowledge)?;
            println!("{}", serde_json::to_string_pretty(&agent.classify(text)?)?);
        }
        Command::Suggestions => {
            let agent = build_agent(&cli, &knowledge)?;
            for suggestion in agent.suggestions("") {
                println!("- {suggestion}");
            }
        }
        Command::Chat => {
            let agent = build_agent(&cli, &knowledge)?;
            run_chat(agent).await?;
        }
    }

    Ok(())
}

async fn run_chat(agent: EnquiryAgent<MemoryContextStore>) -> Result<()> {
    let mut session_id: Option<String> = None;

    println!(
        "College enquiry chat ({} classifier). type 'exit' to quit.",
        agent.classifier_name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message.is_empty() {
            continue;
        }

        match message {
            "/reset" => {
                if let Some(id) = session_id.take() {
                    agent.reset(&id);
                }
                println!("\nConversation cleared.\n");
                continue;
            }
            "/context" => {
                let view = session_id
                    .as_deref()
                    .and_then(|id| agent.context(id, 5));
                match view {
                    Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                    None => println!("\nNo conversation yet.\n"),
                }
                continue;
            }
            _ => {}
        }

        let reply = agent
            .handle_chat(ChatInput {
                session_id: session_id.clone(),
                message: message.to_string(),
            })
            .await?;
        session_id = Some(reply.session_id.clone());

        let bundle = reply.bundle;
        println!("\n{}\n", bundle.response);
        match bundle.source {
            ResponseSource::Local => println!(
                "[{} {:.2}]",
                bundle.intent.as_str(),
                bundle.confidence
            ),
            ResponseSource::External => println!(
                "[answered by {}]",
                bundle.provider.as_deref().unwrap_or("provider")
            ),
            ResponseSource::Degraded => println!("[providers unavailable]"),
        }

        if !bundle.suggestions.is_empty() {
            println!("You could also ask:");
            for suggestion in bundle.suggestions {
                println!("- {suggestion}");
            }
            println!();
        }
    }

    Ok(())
}

fn build_agent(cli: &Cli, knowledge: &KnowledgeBase) -> Result<EnquiryAgent<MemoryContextStore>> {
    let mut settings = AgentSettings::from_env();
    if let Some(kind) = cli.classifier {
        settings.classifier = kind;
    }
    if cli.seed.is_some() {
        settings.rng_seed = cli.seed;
    }

    let providers = if cli.offline {
        ProviderChain::empty()
    } else {
        ProviderChain::from_settings(&ProviderSettings::from_env())?
    };

    Ok(EnquiryAgent::new(
        knowledge,
        MemoryContextStore::with_limits(settings.limits),
        settings,
        providers,
        AppMetrics::shared(),
    ))
}
