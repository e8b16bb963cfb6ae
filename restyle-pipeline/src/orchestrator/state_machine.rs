//! Pipeline state machine
//!
//! `Pending → Fetching → Separating → StyleTransferring → Transcribing →
//! Captioning → {Succeeded | PartiallySucceeded | Failed}`, plus `Cancelled`
//! reachable from any non-terminal state.
//!
//! Transitions are a pure function of (current state, stage outcome) so the
//! partial-success policy is testable without running any stage.

use crate::models::StageName;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Pending,
    Fetching,
    Separating,
    StyleTransferring,
    Transcribing,
    Captioning,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Cancelled,
}

impl PipelineState {
    /// Stage executed while in this state
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineState::Fetching => Some(StageName::Fetch),
            PipelineState::Separating => Some(StageName::Separate),
            PipelineState::StyleTransferring => Some(StageName::StyleTransfer),
            PipelineState::Transcribing => Some(StageName::Transcribe),
            PipelineState::Captioning => Some(StageName::Caption),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded
                | PipelineState::PartiallySucceeded
                | PipelineState::Failed
                | PipelineState::Cancelled
        )
    }

    fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Pending => Some(PipelineState::Fetching),
            PipelineState::Fetching => Some(PipelineState::Separating),
            PipelineState::Separating => Some(PipelineState::StyleTransferring),
            PipelineState::StyleTransferring => Some(PipelineState::Transcribing),
            PipelineState::Transcribing => Some(PipelineState::Captioning),
            _ => None,
        }
    }
}

/// Input to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Job picked up by its task
    Start,
    /// Current stage produced verified output
    StageSucceeded,
    /// Current stage failed
    StageFailed,
    /// Current stage was not attempted
    StageSkipped,
    Cancelled,
    /// Promoting a stage output to the published root failed after the
    /// pipeline finished
    PublicationFailed { stage: StageName },
}

/// State transition record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Pipeline state plus the "some best-effort stage did not succeed" flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    state: PipelineState,
    degraded: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            degraded: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Apply an event and return the resulting transition
    pub fn apply(&mut self, event: PipelineEvent) -> StateTransition {
        let from = self.state;
        self.state = self.next_state(event);
        StateTransition {
            from,
            to: self.state,
        }
    }

    fn next_state(&mut self, event: PipelineEvent) -> PipelineState {
        let current = self.state;

        if current.is_terminal() {
            return match (current, event) {
                (
                    PipelineState::Succeeded | PipelineState::PartiallySucceeded,
                    PipelineEvent::PublicationFailed { stage },
                ) => {
                    if stage.is_required() {
                        PipelineState::Failed
                    } else {
                        self.degraded = true;
                        PipelineState::PartiallySucceeded
                    }
                }
                _ => current,
            };
        }

        match event {
            PipelineEvent::Cancelled => PipelineState::Cancelled,
            PipelineEvent::Start => match current {
                PipelineState::Pending => PipelineState::Fetching,
                other => other,
            },
            PipelineEvent::PublicationFailed { .. } => current,
            PipelineEvent::StageSucceeded => self.advance(current),
            PipelineEvent::StageFailed | PipelineEvent::StageSkipped => {
                match current.stage() {
                    Some(stage) if stage.is_required() => PipelineState::Failed,
                    Some(_) => {
                        self.degraded = true;
                        self.advance(current)
                    }
                    None => current,
                }
            }
        }
    }

    fn advance(&self, current: PipelineState) -> PipelineState {
        match current {
            PipelineState::Captioning if self.degraded => PipelineState::PartiallySucceeded,
            PipelineState::Captioning => PipelineState::Succeeded,
            PipelineState::Pending => current,
            other => other.next().unwrap_or(other),
        }
    }
}
