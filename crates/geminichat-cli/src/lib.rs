// Library interface for geminichat-cli
// This allows integration tests to access internal modules

// NOTE: Since commands.rs and files.rs are also declared in main.rs,
// we need to use a path attribute to reference the same source file
// to avoid "file loaded multiple times" errors.

#[path = "commands.rs"]
pub mod commands;

#[path = "files.rs"]
pub mod files;

// Re-export commonly used items for easier testing
pub use commands::{handle_command, pending_turn_notice, CommandResult};
pub use files::{format_size, load_attachment};
