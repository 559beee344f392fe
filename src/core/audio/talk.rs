//! Push-to-talk state.
//!
//! Two gesture surfaces drive a single `talking` flag:
//!
//! - **Hold**: `start` → Talking, `stop` → Idle + commit, `cancel` → Idle
//! - **Toggle**: `toggle` flips the flag; turning it off commits
//!
//! Both surfaces may be live at once; the last writer wins. A commit is
//! emitted only on an actual Talking → Idle transition, never on entry.
//! Network events never touch this state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::core::relay::ControlMessage;

/// Shared read handle on the talk flag.
///
/// Capture callbacks hold a clone and sample it once per block.
#[derive(Debug, Clone, Default)]
pub struct TalkState {
    talking: Arc<AtomicBool>,
}

impl TalkState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_talking(&self) -> bool {
        self.talking.load(Ordering::Acquire)
    }

    /// Swap in a new value and return the previous one.
    fn replace(&self, talking: bool) -> bool {
        self.talking.swap(talking, Ordering::AcqRel)
    }
}

/// Talk mode as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkMode {
    Idle,
    Talking,
}

/// Gesture-driven talk state machine.
#[derive(Debug, Clone, Default)]
pub struct TalkStateMachine {
    state: TalkState,
}

impl TalkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for capture callbacks.
    pub fn state(&self) -> TalkState {
        self.state.clone()
    }

    pub fn mode(&self) -> TalkMode {
        if self.state.is_talking() {
            TalkMode::Talking
        } else {
            TalkMode::Idle
        }
    }

    pub fn is_talking(&self) -> bool {
        self.state.is_talking()
    }

    /// Hold gesture pressed.
    pub fn start(&self) -> Option<ControlMessage> {
        if !self.state.replace(true) {
            debug!("Talk started (hold)");
        }
        None
    }

    /// Hold gesture released: commits the buffered turn.
    pub fn stop(&self) -> Option<ControlMessage> {
        self.transition_to_idle(true, "hold released")
    }

    /// Hold gesture abandoned (pointer left the control): no commit.
    pub fn cancel(&self) -> Option<ControlMessage> {
        self.transition_to_idle(false, "hold cancelled")
    }

    /// Tap gesture: flip between Idle and Talking.
    pub fn toggle(&self) -> Option<ControlMessage> {
        if self.state.is_talking() {
            self.transition_to_idle(true, "toggled off")
        } else {
            self.state.replace(true);
            debug!("Talk started (toggle)");
            None
        }
    }

    fn transition_to_idle(&self, commit: bool, cause: &str) -> Option<ControlMessage> {
        let was_talking = self.state.replace(false);
        if !was_talking {
            return None;
        }
        debug!(commit, "Talk stopped: {}", cause);
        commit.then_some(ControlMessage::InputAudioBufferCommit)
    }
}
