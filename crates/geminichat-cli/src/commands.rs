use geminichat_core::constants::{limits, models};
use geminichat_core::ChatSession;

/// Result of processing a slash command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Display a message to the user.
    Message(String),
    /// Quit the application.
    Quit,
    /// Clear the conversation history.
    Clear,
    /// Show session token usage.
    ShowUsage,
    /// Zero the session token counters.
    ResetUsage,
    SetTemperature(f32),
    SetTopP(f32),
    /// `None` turns the thinking budget off.
    SetThinkingBudget(Option<u32>),
    SetGrounding(bool),
    /// `None` clears the system instruction.
    SetSystemInstruction(Option<String>),
    /// Change the model.
    ModelChanged(String),
    /// Load a file into the attachment tray.
    Attach(String),
    /// List files in the tray.
    ListFiles,
    SelectFile(u64),
    UnselectFile(u64),
    /// Remove every file from the tray.
    DetachAll,
    /// Resend the last unanswered message.
    Retry,
    /// Show the active configuration.
    ShowConfig,
    /// Write the active configuration to the config file.
    SaveConfig,
    /// Not a command - treat as regular input.
    NotACommand,
}

pub fn handle_command(input: &str) -> CommandResult {
    let input = input.trim();
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/help" | "/h" => show_help(),
        "/exit" | "/quit" | "/q" => CommandResult::Quit,
        "/clear" => CommandResult::Clear,

        // Usage
        "/usage" | "/tokens" => CommandResult::ShowUsage,
        "/reset-usage" => CommandResult::ResetUsage,

        // Generation settings
        "/temp" | "/temperature" => match parse_unit(arg) {
            Some(v) => CommandResult::SetTemperature(v),
            None => CommandResult::Message("Usage: /temp <0.0-1.0>".into()),
        },
        "/top-p" => match parse_unit(arg) {
            Some(v) => CommandResult::SetTopP(v),
            None => CommandResult::Message("Usage: /top-p <0.0-1.0>".into()),
        },
        "/thinking" => match arg {
            "off" | "none" => CommandResult::SetThinkingBudget(None),
            _ => match arg.parse::<u32>() {
                Ok(budget) => CommandResult::SetThinkingBudget(Some(budget)),
                Err(_) => CommandResult::Message(format!(
                    "Usage: /thinking <0-{}|off>",
                    limits::MAX_THINKING_BUDGET
                )),
            },
        },
        "/grounding" => match arg {
            "on" | "true" => CommandResult::SetGrounding(true),
            "off" | "false" => CommandResult::SetGrounding(false),
            _ => CommandResult::Message("Usage: /grounding <on|off>".into()),
        },
        "/system" => match arg {
            "" => CommandResult::Message("Usage: /system <instruction|off>".into()),
            "off" => CommandResult::SetSystemInstruction(None),
            text => CommandResult::SetSystemInstruction(Some(text.to_string())),
        },
        "/model" => {
            if arg.is_empty() {
                CommandResult::Message(format!(
                    "Known models: {}\nUsage: /model <model-name>",
                    models::KNOWN_MODELS.join(", ")
                ))
            } else {
                CommandResult::ModelChanged(arg.to_string())
            }
        }

        // Attachments
        "/attach" => {
            if arg.is_empty() {
                CommandResult::Message("Usage: /attach <path>".into())
            } else {
                CommandResult::Attach(arg.to_string())
            }
        }
        "/files" => CommandResult::ListFiles,
        "/select" => match arg.parse::<u64>() {
            Ok(id) => CommandResult::SelectFile(id),
            Err(_) => CommandResult::Message("Usage: /select <file-id>".into()),
        },
        "/unselect" => match arg.parse::<u64>() {
            Ok(id) => CommandResult::UnselectFile(id),
            Err(_) => CommandResult::Message("Usage: /unselect <file-id>".into()),
        },
        "/detach-all" => CommandResult::DetachAll,

        "/retry" => CommandResult::Retry,
        "/config" => CommandResult::ShowConfig,
        "/save-config" => CommandResult::SaveConfig,
        "/version" => CommandResult::Message(format!("geminichat v{}", env!("CARGO_PKG_VERSION"))),

        // Unknown command
        _ => {
            if input.starts_with('/') {
                CommandResult::Message(format!("Unknown command: {cmd}. Type /help for commands."))
            } else {
                CommandResult::NotACommand
            }
        }
    }
}

/// Shown instead of sending when an earlier message never got its reply.
/// A new line cannot follow an unanswered one.
pub fn pending_turn_notice(session: &ChatSession) -> Option<&'static str> {
    session.has_dangling_turn().then_some(
        "Your previous message has no reply yet. Use /retry to resend it or /clear first.",
    )
}

fn parse_unit(arg: &str) -> Option<f32> {
    arg.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn show_help() -> CommandResult {
    let help_text = "\
╭─ geminichat commands ──────────────────────────────────────────╮

  CONVERSATION
    /clear                    Clear chat history
    /retry                    Resend the last unanswered message
    /usage, /tokens           Show session token usage
    /reset-usage              Reset token counters

  GENERATION
    /model <name>             Change model
    /temp <0-1>               Set temperature
    /top-p <0-1>              Set top-p
    /thinking <n|off>         Set thinking budget
    /grounding <on|off>       Toggle Google Search grounding
    /system <text|off>        Set or clear the system instruction

  FILES
    /attach <path>            Add a file to the tray
    /files                    List files (* = sent with next message)
    /select <id>              Send a file with the next message
    /unselect <id>            Stop sending a file
    /detach-all               Remove all files

  OTHER
    /config                   Show active configuration
    /save-config              Save configuration to disk
    /help, /h                 Show this help message
    /version                  Show version information
    /exit, /quit, /q          Quit

╰────────────────────────────────────────────────────────────────╯";

    CommandResult::Message(help_text.into())
}
