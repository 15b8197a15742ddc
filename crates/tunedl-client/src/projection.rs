//! Derived control state — a pure function of the session.
//!
//! Whatever renders the form reads this instead of toggling widgets
//! imperatively, so the controls can never disagree with the state machine.

use crate::session::{Phase, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
    /// Show the retry affordance instead of the primary actions.
    pub retry_visible: bool,
    /// Every form input is disabled while a job is live.
    pub form_locked: bool,
    pub percent: u8,
    pub status_text: String,
}

impl Controls {
    pub fn derive(session: &Session) -> Self {
        let phase = session.phase();
        let form_locked = phase.is_active();
        Self {
            start_enabled: !form_locked,
            stop_enabled: phase == Phase::Running,
            retry_visible: phase.is_terminal() && session.has_failed_items(),
            form_locked,
            percent: session.progress().percent,
            status_text: session.progress().status_text.clone(),
        }
    }
}
