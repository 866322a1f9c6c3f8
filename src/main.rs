use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pocket_pharmacist::commands::{self, ChatStart};
use pocket_pharmacist::config::Config;
use pocket_pharmacist::{
    ChatbotGateway, ConversationOrchestrator, EchoChatbotGateway, HttpChatbotGateway, JsonFileStore,
};

#[derive(Parser)]
#[command(name = "pocket-pharmacist")]
#[command(version)]
#[command(about = "Chat with the Pocket Pharmacist assistant", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.pocket-pharmacist/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer locally with canned replies instead of calling the backend
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start chatting (default)
    Chat {
        /// Continue the most recent conversation
        #[arg(long, conflicts_with = "conversation")]
        resume: bool,
        /// Open a specific conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List stored conversations
    List,
    /// Print one conversation
    Show { id: String },
    /// Delete one conversation
    Delete { id: String },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pocket_pharmacist=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store = Arc::new(JsonFileStore::new(&config.storage.data_dir));

    match cli.command.unwrap_or(Commands::Chat {
        resume: false,
        conversation: None,
    }) {
        Commands::Chat {
            resume,
            conversation,
        } => {
            let gateway: Arc<dyn ChatbotGateway> = if cli.offline {
                Arc::new(EchoChatbotGateway)
            } else {
                let http = HttpChatbotGateway::from_config(&config)?;
                tracing::info!(endpoint = http.endpoint(), "Using chatbot backend");
                Arc::new(http)
            };
            let orchestrator =
                ConversationOrchestrator::new(store, gateway).with_greeting(config.greeting());

            let start = match (resume, conversation) {
                (_, Some(id)) => ChatStart::Conversation(id),
                (true, None) => ChatStart::Resume,
                (false, None) => ChatStart::New,
            };
            commands::run_chat(&orchestrator, start).await?;
        }
        Commands::List => commands::list_conversations(store.as_ref()).await?,
        Commands::Show { id } => commands::show_conversation(store.as_ref(), &id).await?,
        Commands::Delete { id } => commands::delete_conversation(store.as_ref(), &id).await?,
    }

    Ok(())
}
