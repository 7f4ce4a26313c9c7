use std::fmt;

use crate::context::UsageDelta;
use crate::error::{ChatError, Result};
use crate::llm::Fragment;

/// Lifecycle of one model response.
///
/// `Idle -> Requesting -> Streaming -> Completed`, with `Failed` reachable
/// from `Requesting` and `Streaming`. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

impl AssemblyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed assembly hands back to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledReply {
    pub text: String,
    pub usage: Option<UsageDelta>,
    pub block_reason: Option<String>,
    pub grounding: Option<String>,
}

/// Accumulates streamed fragments into a single reply.
///
/// Text is appended in arrival order. Only the first fragment that carries
/// usage is kept; later usage is ignored. Nothing leaves the assembly until
/// [`complete`](Self::complete), so a failed stream leaves no trace.
#[derive(Debug)]
pub struct ResponseAssembly {
    state: AssemblyState,
    text: String,
    usage: Option<UsageDelta>,
    block_reason: Option<String>,
    grounding: Option<String>,
}

impl Default for ResponseAssembly {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembly {
    pub fn new() -> Self {
        Self {
            state: AssemblyState::Idle,
            text: String::new(),
            usage: None,
            block_reason: None,
            grounding: None,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Text received so far, for incremental rendering.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn staged_usage(&self) -> Option<UsageDelta> {
        self.usage
    }

    pub fn start_request(&mut self) -> Result<()> {
        self.transition("start request", &[AssemblyState::Idle], AssemblyState::Requesting)
    }

    /// Absorb one fragment. Returns `true` when this fragment's usage was the
    /// one staged for recording.
    pub fn push_fragment(&mut self, fragment: Fragment) -> Result<bool> {
        self.transition(
            "receive fragment",
            &[AssemblyState::Requesting, AssemblyState::Streaming],
            AssemblyState::Streaming,
        )?;

        if let Some(text) = fragment.text {
            self.text.push_str(&text);
        }
        if self.block_reason.is_none() {
            self.block_reason = fragment.block_reason;
        }
        if fragment.grounding.is_some() {
            self.grounding = fragment.grounding;
        }

        match (self.usage, fragment.usage) {
            (None, Some(usage)) => {
                self.usage = Some(usage);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Finish the stream. A stream that ends before any fragment arrived
    /// completes with an empty reply.
    pub fn complete(&mut self) -> Result<AssembledReply> {
        self.transition(
            "complete",
            &[AssemblyState::Requesting, AssemblyState::Streaming],
            AssemblyState::Completed,
        )?;
        Ok(AssembledReply {
            text: std::mem::take(&mut self.text),
            usage: self.usage,
            block_reason: self.block_reason.take(),
            grounding: self.grounding.take(),
        })
    }

    /// Abort the stream and drop everything received so far.
    pub fn fail(&mut self) -> Result<()> {
        self.transition(
            "fail",
            &[AssemblyState::Requesting, AssemblyState::Streaming],
            AssemblyState::Failed,
        )?;
        self.text.clear();
        self.usage = None;
        self.block_reason = None;
        self.grounding = None;
        Ok(())
    }

    fn transition(
        &mut self,
        event: &'static str,
        from: &[AssemblyState],
        to: AssemblyState,
    ) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(ChatError::InvalidTransition {
                state: self.state.as_str(),
                event,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> ResponseAssembly {
        let mut assembly = ResponseAssembly::new();
        assembly.start_request().unwrap();
        assembly
    }

    #[test]
    fn fragments_concatenate_and_first_usage_wins() {
        let mut assembly = streaming();
        let first = UsageDelta::new(10, 5, 15);
        assert!(assembly
            .push_fragment(Fragment::text("Hel").with_usage(first))
            .unwrap());
        assert!(!assembly
            .push_fragment(Fragment::text("lo").with_usage(UsageDelta::new(99, 99, 198)))
            .unwrap());
        assert_eq!(assembly.text(), "Hello");
        assert_eq!(assembly.state(), AssemblyState::Streaming);

        let reply = assembly.complete().unwrap();
        assert_eq!(reply.text, "Hello");
        assert_eq!(reply.usage, Some(first));
        assert_eq!(assembly.state(), AssemblyState::Completed);
    }

    #[test]
    fn fragments_rejected_before_request() {
        let mut assembly = ResponseAssembly::new();
        let err = assembly.push_fragment(Fragment::text("x")).unwrap_err();
        assert!(matches!(
            err,
            ChatError::InvalidTransition { state: "idle", .. }
        ));
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut assembly = streaming();
        assembly.push_fragment(Fragment::text("partial")).unwrap();
        assembly.fail().unwrap();
        assert_eq!(assembly.text(), "");
        assert!(assembly.staged_usage().is_none());
        assert!(assembly.state().is_terminal());
        assert!(assembly.push_fragment(Fragment::text("late")).is_err());
        assert!(assembly.complete().is_err());
        assert!(assembly.fail().is_err());
        assert!(assembly.start_request().is_err());
    }

    #[test]
    fn requesting_can_fail_directly() {
        let mut assembly = streaming();
        assert!(assembly.fail().is_ok());
        assert_eq!(assembly.state(), AssemblyState::Failed);
    }

    #[test]
    fn block_reason_and_grounding_carried_to_reply() {
        let mut assembly = streaming();
        assembly.push_fragment(Fragment::blocked("SAFETY")).unwrap();
        assembly
            .push_fragment(Fragment {
                grounding: Some("<div>chips</div>".into()),
                ..Fragment::default()
            })
            .unwrap();
        let reply = assembly.complete().unwrap();
        assert_eq!(reply.block_reason.as_deref(), Some("SAFETY"));
        assert_eq!(reply.grounding.as_deref(), Some("<div>chips</div>"));
    }
}
