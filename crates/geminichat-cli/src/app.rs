use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use geminichat_core::constants::caching::TTL_PRESETS;
use geminichat_core::llm::parse_ttl;
use geminichat_core::{
    caching, AttachmentId, AttachmentTray, CacheJob, CacheJobEvent, CachePhase, CacheProvider,
    ChatError, ChatSession, GeminiClient, SessionEvent, Settings, TurnOutcome, UsageCounters,
    UsageDelta,
};

use crate::commands::{handle_command, pending_turn_notice, CommandResult};
use crate::files::{format_size, load_attachment};

// ── Single prompt ───────────────────────────────────────────────────────

pub async fn run_single_prompt(settings: &Settings, prompt: &str, attach: &[PathBuf]) -> Result<()> {
    let client = settings.build_client()?;
    let mut session = ChatSession::from_settings(Arc::new(client), settings);

    let attachments = attach
        .iter()
        .map(|p| load_attachment(p))
        .collect::<Result<Vec<_>>>()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let handle = tokio::spawn({
        let prompt = prompt.to_string();
        async move {
            session
                .send_message_with_events(&prompt, attachments, event_tx)
                .await
        }
    });

    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::TextDelta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::Complete(outcome) => print_outcome_tail(&outcome),
            // Reported through the task's result.
            SessionEvent::Error(_) => println!(),
            SessionEvent::Requesting { .. } => {}
        }
    }

    handle.await??;
    Ok(())
}

// ── Interactive REPL ────────────────────────────────────────────────────

struct Repl {
    settings: Settings,
    session: ChatSession,
    tray: AttachmentTray,
}

pub async fn run_repl(settings: Settings) -> Result<()> {
    let client = settings.build_client()?;
    let session = ChatSession::from_settings(Arc::new(client), &settings);
    let mut repl = Repl {
        settings,
        session,
        tray: AttachmentTray::new(),
    };

    println!(
        "geminichat v{} - model {} - /help for commands",
        env!("CARGO_PKG_VERSION"),
        repl.session.model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", prompt_badge(&repl.tray));
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_command(line) {
            CommandResult::NotACommand => repl.send(line).await,
            CommandResult::Retry => repl.retry().await,
            CommandResult::Quit => break,
            result => repl.apply(result),
        }
    }

    Ok(())
}

fn prompt_badge(tray: &AttachmentTray) -> String {
    match tray.selected_count() {
        0 => String::new(),
        n => format!("[{n} file{}] ", if n == 1 { "" } else { "s" }),
    }
}

impl Repl {
    async fn send(&mut self, text: &str) {
        if let Some(notice) = pending_turn_notice(&self.session) {
            eprintln!("{notice}");
            return;
        }
        let attachments = self.tray.selected();
        let (tx, rx) = mpsc::unbounded_channel();
        let result = {
            let send = self.session.send_message_with_events(text, attachments, tx);
            stream_to_stdout(send, rx).await
        };
        self.after_request(result);
    }

    async fn retry(&mut self) {
        if !self.session.has_dangling_turn() {
            println!("Nothing to retry.");
            return;
        }
        let attachments = self.tray.selected();
        let (tx, rx) = mpsc::unbounded_channel();
        let result = {
            let send = self.session.retry_with_events(attachments, tx);
            stream_to_stdout(send, rx).await
        };
        self.after_request(result);
    }

    fn after_request(&mut self, result: Option<Result<TurnOutcome, ChatError>>) {
        match result {
            Some(Ok(outcome)) => {
                print_outcome_tail(&outcome);
                self.tray.reset_selection();
            }
            Some(Err(e)) if e.is_integration_error() => {
                tracing::error!(error = %e, "session rejected the request");
                eprintln!("\nInternal error: {e}");
            }
            Some(Err(e)) => {
                eprintln!("\nError: {e}");
                match e.retry_after() {
                    Some(delay) => eprintln!("(temporary failure, retry in {}s)", delay.as_secs()),
                    None if e.is_retryable() => eprintln!("(temporary failure)"),
                    None => {}
                }
                if self.session.has_dangling_turn() {
                    eprintln!("Your message is kept. Use /retry to send it again.");
                }
            }
            None => {
                self.session.abandon_in_flight();
                eprintln!("\n{}", ChatError::Cancelled);
            }
        }
    }

    fn apply(&mut self, result: CommandResult) {
        let outcome: Result<String> = match result {
            CommandResult::Message(msg) => Ok(msg),
            CommandResult::Clear => {
                self.session.clear();
                Ok("Chat history cleared.".into())
            }
            CommandResult::ShowUsage => Ok(format_usage(&self.session.usage())),
            CommandResult::ResetUsage => {
                self.session.reset_usage();
                Ok("Token counters reset.".into())
            }
            CommandResult::SetTemperature(v) => self
                .session
                .config_mut()
                .set_temperature(v)
                .map(|_| format!("Temperature set to {v}"))
                .map_err(Into::into),
            CommandResult::SetTopP(v) => self
                .session
                .config_mut()
                .set_top_p(v)
                .map(|_| format!("Top-p set to {v}"))
                .map_err(Into::into),
            CommandResult::SetThinkingBudget(budget) => self
                .session
                .config_mut()
                .set_thinking_budget(budget)
                .map(|_| match budget {
                    Some(b) => format!("Thinking budget set to {b}"),
                    None => "Thinking budget off".into(),
                })
                .map_err(Into::into),
            CommandResult::SetGrounding(on) => {
                self.session.config_mut().set_grounding(on);
                Ok(format!("Grounding {}", if on { "on" } else { "off" }))
            }
            CommandResult::SetSystemInstruction(text) => {
                let cleared = text.is_none();
                self.session.config_mut().set_system_instruction(text);
                Ok(if cleared {
                    "System instruction cleared".into()
                } else {
                    "System instruction set".into()
                })
            }
            CommandResult::ModelChanged(model) => {
                self.session.set_model(&model);
                Ok(format!("Model set to {model}"))
            }
            CommandResult::Attach(path) => self.attach(Path::new(&path)),
            CommandResult::ListFiles => Ok(self.list_files()),
            CommandResult::SelectFile(id) => Ok(if self.tray.select(AttachmentId::from(id)) {
                format!("File {id} will be sent with the next message")
            } else {
                format!("No file with id {id}")
            }),
            CommandResult::UnselectFile(id) => Ok(if self.tray.unselect(AttachmentId::from(id)) {
                format!("File {id} unselected")
            } else {
                format!("No file with id {id}")
            }),
            CommandResult::DetachAll => {
                self.tray.clear();
                Ok("All files removed.".into())
            }
            CommandResult::ShowConfig => Ok(self.describe_config()),
            CommandResult::SaveConfig => self.save_config(),
            // Handled by the caller.
            CommandResult::Retry | CommandResult::Quit | CommandResult::NotACommand => {
                return;
            }
        };

        match outcome {
            Ok(msg) => println!("{msg}"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    fn attach(&mut self, path: &Path) -> Result<String> {
        let file = load_attachment(path)?;
        let (name, size) = (file.name.clone(), file.size());
        let id = self.tray.add(file, self.session.projector().allow_list())?;
        self.tray.select(id);
        Ok(format!(
            "Added [{id}] {name} ({}), selected for the next message",
            format_size(size)
        ))
    }

    fn list_files(&self) -> String {
        if self.tray.is_empty() {
            return "No files uploaded yet.".into();
        }
        self.tray
            .entries()
            .iter()
            .map(|e| {
                format!(
                    "{} [{}] {} ({}, {})",
                    if e.selected { "*" } else { " " },
                    e.id,
                    e.file.name,
                    e.file.mime_type,
                    format_size(e.file.size())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn describe_config(&self) -> String {
        let c = self.session.config();
        format!(
            "model:              {}\n\
             temperature:        {}\n\
             top_p:              {}\n\
             thinking_budget:    {}\n\
             grounding:          {}\n\
             system_instruction: {}\n\
             rollback on error:  {}\n\
             config file:        {}",
            self.session.model(),
            c.temperature(),
            c.top_p(),
            c.thinking_budget()
                .map_or_else(|| "off".to_string(), |b| b.to_string()),
            if c.grounding_enabled() { "on" } else { "off" },
            c.system_instruction().unwrap_or("(none)"),
            self.session.policy().rollback_user_turn_on_failure,
            Settings::config_path().display()
        )
    }

    fn save_config(&mut self) -> Result<String> {
        self.settings.provider.model = self.session.model().to_string();
        self.settings.generation = self.session.config().clone();
        self.settings.save()?;
        Ok(format!("Saved to {}", Settings::config_path().display()))
    }
}

/// Drive `send` to completion while printing text deltas. `None` when the
/// user pressed Ctrl-C.
async fn stream_to_stdout<F>(
    send: F,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<Result<TurnOutcome, ChatError>>
where
    F: std::future::Future<Output = Result<TurnOutcome, ChatError>>,
{
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break Some(result),
            Some(event) = rx.recv() => render_event(event),
            _ = tokio::signal::ctrl_c() => break None,
        }
    };
    while let Ok(event) = rx.try_recv() {
        render_event(event);
    }
    result
}

fn render_event(event: SessionEvent) {
    if let SessionEvent::TextDelta(text) = event {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Block notices, empty-reply notices, grounding, and usage after a reply.
fn print_outcome_tail(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Reply { text, grounding, .. } => {
            if text.is_empty() {
                print!("{}", outcome.display_text());
            }
            println!();
            if grounding.is_some() {
                eprintln!("[grounded with Google Search]");
            }
        }
        TurnOutcome::Blocked { .. } => {
            println!();
            eprintln!("{}", outcome.display_text());
        }
    }
    if let Some(usage) = outcome.usage() {
        eprintln!("{}", format_delta(&usage));
    }
}

fn format_delta(usage: &UsageDelta) -> String {
    let mut line = format!(
        "[tokens: {} in / {} out / {} total",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
    if usage.cached_tokens > 0 {
        line.push_str(&format!(", {} cached", usage.cached_tokens));
    }
    line.push(']');
    line
}

fn format_usage(usage: &UsageCounters) -> String {
    format!(
        "Session usage over {} request(s)\n  Input tokens:  {}\n  Output tokens: {}\n  Total tokens:  {}\n  Cached tokens: {}",
        usage.request_count,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
        usage.cached_tokens
    )
}

// ── Context caches ──────────────────────────────────────────────────────

pub async fn cache_create(
    settings: &Settings,
    file: &Path,
    ttl: &str,
    system: Option<String>,
) -> Result<()> {
    let ttl = parse_ttl(ttl).ok_or_else(|| {
        let presets: Vec<&str> = TTL_PRESETS.iter().map(|(label, _)| *label).collect();
        anyhow!("Invalid TTL '{ttl}'. Try one of: {}", presets.join(", "))
    })?;
    let client = settings.build_client()?;
    let input = load_attachment(file)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                CacheJobEvent::Phase(CachePhase::Uploading) => eprintln!("Uploading..."),
                CacheJobEvent::Phase(CachePhase::Processing) => eprintln!("Waiting for processing..."),
                CacheJobEvent::Phase(CachePhase::Active) => eprintln!("File is ready."),
                CacheJobEvent::Phase(phase) => eprintln!("Stopped: {phase:?}"),
                CacheJobEvent::Polled { state, elapsed } => {
                    eprintln!("  {state:?} after {}s", elapsed.as_secs())
                }
                CacheJobEvent::Uploaded(f) => eprintln!("Uploaded as {}", f.name),
                CacheJobEvent::Created(_) => {}
            }
        }
    });

    let job = CacheJob::new(&settings.provider.model, &settings.cache)
        .with_ttl(ttl)
        .with_system_instruction(system)
        .with_events(tx);
    let result = job.run(&client, &input).await;
    drop(job);
    let _ = printer.await;

    let handle = result?;
    println!("{}", handle.name);
    if let Some(expires) = handle.expire_time {
        eprintln!("Expires {}", expires.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}

pub async fn cache_list(settings: &Settings) -> Result<()> {
    let client = settings.build_client()?;
    let caches = client.list_caches().await?;
    if caches.is_empty() {
        println!("No caches.");
        return Ok(());
    }
    let now = chrono::Utc::now();
    for cache in caches {
        let remaining = cache
            .remaining(now)
            .map_or_else(|| "-".to_string(), |d| format!("{}m left", d.as_secs() / 60));
        println!(
            "{}  {}  {}  {}",
            cache.name,
            cache.display_name.as_deref().unwrap_or("-"),
            cache.model.as_deref().unwrap_or("-"),
            remaining
        );
    }
    Ok(())
}

pub async fn cache_delete(settings: &Settings, name: &str) -> Result<()> {
    let client = settings.build_client()?;
    client.delete_cache(name).await?;
    println!("Deleted {name}");
    Ok(())
}

pub async fn cache_query(settings: &Settings, name: &str, prompt: &str) -> Result<()> {
    let client = settings.build_client()?;
    let model = cache_model(&client, name)
        .await
        .unwrap_or_else(|| settings.provider.model.clone());

    let response = caching::query_cache(&client, &model, &settings.generation, name, prompt)
        .await
        .with_context(|| format!("querying {name}"))?;

    // Shown per query; never folded into a session's totals.
    let outcome = match response.block_reason {
        Some(reason) => TurnOutcome::Blocked {
            reason,
            usage: response.usage,
        },
        None => TurnOutcome::Reply {
            text: response.text,
            grounding: response.grounding,
            usage: response.usage,
        },
    };
    match outcome {
        TurnOutcome::Blocked { .. } => eprintln!("{}", outcome.display_text()),
        TurnOutcome::Reply { .. } => println!("{}", outcome.display_text()),
    }
    if let Some(usage) = outcome.usage() {
        eprintln!("{}", format_delta(&usage));
    }
    Ok(())
}

/// A cache only answers for the model it was created with.
async fn cache_model(client: &GeminiClient, name: &str) -> Option<String> {
    let handle = client.get_cache(name).await.ok()?;
    let model = handle.model?;
    Some(model.strip_prefix("models/").unwrap_or(&model).to_string())
}
