use std::io::{self, Write};
use std::str::FromStr;

use anyhow::{Context, Result};
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::model::{sort_newest_first, Conversation, Message, Sender};
use crate::orchestrator::ConversationOrchestrator;
use crate::storage::ConversationStore;

/// Commands that can be typed at the chat prompt with a leading slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new conversation
    New,
    /// List stored conversations
    List,
    /// Switch to another conversation
    Switch,
    /// Delete a conversation
    Delete,
    /// Show help
    Help,
    /// Exit the chat
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl SlashCommand {
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new conversation",
            SlashCommand::List => "list stored conversations",
            SlashCommand::Switch => "switch to the conversation with the given id",
            SlashCommand::Delete => "delete a conversation (defaults to the current one)",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the chat",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let remainder: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "s" | "select" | "open" => Some(SlashCommand::Switch),
        "ls" => Some(SlashCommand::List),
        _ => None,
    })?;

    let argument = if remainder.is_empty() {
        None
    } else {
        Some(remainder.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }
    help.push_str("\nAliases: /q, /quit, /exit for /bye; /s for /switch; /ls for /list");
    help
}

/// One transcript line for `message`
pub fn format_message(message: &Message) -> String {
    let icon = match message.sender {
        Sender::User => "👤",
        Sender::Bot => "💊",
    };
    let time = message
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    format!("{} [{}] {}", icon, time, message.text)
}

fn print_conversation(conversation: &Conversation) {
    println!("💬 {} ({})", conversation.name, conversation.id);
    println!("{}", "=".repeat(50));
    for message in &conversation.messages {
        println!("{}", format_message(message));
    }
    println!();
}

/// How `chat` picks its first conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStart {
    New,
    Resume,
    Conversation(String),
}

pub async fn list_conversations(store: &dyn ConversationStore) -> Result<()> {
    let mut conversations = store
        .load_all()
        .await
        .context("Failed to load conversations")?;

    if conversations.is_empty() {
        println!("📭 No conversations yet. Run 'pocket-pharmacist chat' to start one!");
        return Ok(());
    }

    sort_newest_first(&mut conversations);
    println!("📋 Your conversations:");
    println!("{}", "=".repeat(50));
    for conversation in conversations {
        println!("💬 {}", conversation.name);
        println!("   🆔 {}", conversation.id);
        println!("   ✉️  {} messages", conversation.messages.len());
        println!();
    }

    Ok(())
}

pub async fn show_conversation(store: &dyn ConversationStore, id: &str) -> Result<()> {
    match store.load(id).await.context("Failed to load conversation")? {
        Some(conversation) => print_conversation(&conversation),
        None => {
            println!("❌ Conversation '{}' not found.", id);
            println!("Run 'pocket-pharmacist list' to see stored conversations.");
        }
    }
    Ok(())
}

pub async fn delete_conversation(store: &dyn ConversationStore, id: &str) -> Result<()> {
    if store.load(id).await.context("Failed to load conversation")?.is_none() {
        println!("❌ Conversation '{}' not found.", id);
        return Ok(());
    }
    store
        .delete(id)
        .await
        .context("Failed to delete conversation")?;
    println!("🗑️  Deleted conversation {}", id);
    Ok(())
}

/// Print and clear whatever error the last operation left behind.
fn report_error(orchestrator: &ConversationOrchestrator) {
    if let Some(error) = orchestrator.error() {
        eprintln!("❌ {}", error);
        orchestrator.clear_error();
    }
}

/// Interactive chat loop over stdin
pub async fn run_chat(orchestrator: &ConversationOrchestrator, start: ChatStart) -> Result<()> {
    match start {
        ChatStart::New => orchestrator.start_new_conversation().await,
        ChatStart::Resume => orchestrator.resume_latest_conversation().await,
        ChatStart::Conversation(id) => orchestrator.select_conversation(&id).await,
    }
    report_error(orchestrator);
    if let Some(conversation) = orchestrator.current_conversation() {
        print_conversation(&conversation);
    }
    println!("💡 Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read user input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_slash_command(input) {
            if !handle_command(orchestrator, command).await {
                break;
            }
            report_error(orchestrator);
            continue;
        }
        if input.starts_with('/') {
            println!("Unknown command. Type /help for the list.");
            continue;
        }

        let before = orchestrator
            .current_conversation()
            .map(|c| c.messages.len())
            .unwrap_or(0);
        println!("⏳ Thinking...");
        orchestrator.send_message(input).await;
        report_error(orchestrator);

        if let Some(conversation) = orchestrator.current_conversation() {
            conversation
                .messages
                .iter()
                .skip(before)
                .filter(|m| m.sender == Sender::Bot)
                .for_each(|m| println!("{}", format_message(m)));
        }
    }

    println!("👋 Bye!");
    Ok(())
}

/// Returns `false` when the loop should stop.
async fn handle_command(orchestrator: &ConversationOrchestrator, command: ParsedCommand) -> bool {
    match command.command {
        SlashCommand::New => {
            orchestrator.start_new_conversation().await;
            if let Some(conversation) = orchestrator.current_conversation() {
                print_conversation(&conversation);
            }
        }
        SlashCommand::List => {
            orchestrator.activate_conversation_selections(true).await;
            let current_id = orchestrator.current_conversation().map(|c| c.id);
            for summary in orchestrator.conversation_selections().unwrap_or_default() {
                let marker = if Some(&summary.id) == current_id.as_ref() { "▶" } else { " " };
                println!("{} {}  {}", marker, summary.id, summary.name);
            }
            orchestrator.activate_conversation_selections(false).await;
        }
        SlashCommand::Switch => match command.argument {
            Some(id) => {
                orchestrator.select_conversation(&id).await;
                if orchestrator.error().is_none() {
                    if let Some(conversation) = orchestrator.current_conversation() {
                        print_conversation(&conversation);
                    }
                }
            }
            None => println!("Usage: /switch <id>"),
        },
        SlashCommand::Delete => {
            let target = command
                .argument
                .or_else(|| orchestrator.current_conversation().map(|c| c.id));
            match target {
                Some(id) => {
                    orchestrator.delete_conversation(&id).await;
                    match orchestrator.current_conversation() {
                        Some(conversation) => print_conversation(&conversation),
                        None => println!("📭 No conversations left. Use /new to start one."),
                    }
                }
                None => println!("Usage: /delete <id>"),
            }
        }
        SlashCommand::Help => println!("{}", get_help_text()),
        SlashCommand::Bye => return false,
    }
    true
}
