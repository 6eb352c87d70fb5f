use chrono::{DateTime, Utc};

use super::domain::{RegistrationType, Semester, WindowBounds};

/// Where wall-clock time sits relative to a semester's configured window for
/// one registration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NotConfigured,
    NotYetOpen { opens_at: DateTime<Utc> },
    Open { closes_at: DateTime<Utc> },
    Closed { closed_at: DateTime<Utc> },
}

/// Denial carrying the exact timestamps so the caller can tell the student
/// when the window opens or closed, not just that it did.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowDenied {
    #[error("{kind} registration is not configured for this semester")]
    NotConfigured { kind: RegistrationType },
    #[error("{kind} registration has not opened yet; it opens at {opens_at}")]
    NotYetOpen {
        kind: RegistrationType,
        opens_at: DateTime<Utc>,
    },
    #[error("{kind} registration closed at {closed_at}")]
    Closed {
        kind: RegistrationType,
        closed_at: DateTime<Utc>,
    },
}

pub fn resolve_window(
    semester: &Semester,
    kind: RegistrationType,
    now: DateTime<Utc>,
) -> WindowState {
    match semester.window(kind) {
        None => WindowState::NotConfigured,
        Some(WindowBounds { opens_at, closes_at }) => {
            if now < *opens_at {
                WindowState::NotYetOpen { opens_at: *opens_at }
            } else if now >= *closes_at {
                WindowState::Closed {
                    closed_at: *closes_at,
                }
            } else {
                WindowState::Open {
                    closes_at: *closes_at,
                }
            }
        }
    }
}

impl WindowState {
    /// Collapse into the OPEN case or a denial for user-facing messaging.
    pub fn require_open(self, kind: RegistrationType) -> Result<DateTime<Utc>, WindowDenied> {
        match self {
            WindowState::Open { closes_at } => Ok(closes_at),
            WindowState::NotConfigured => Err(WindowDenied::NotConfigured { kind }),
            WindowState::NotYetOpen { opens_at } => Err(WindowDenied::NotYetOpen { kind, opens_at }),
            WindowState::Closed { closed_at } => Err(WindowDenied::Closed { kind, closed_at }),
        }
    }
}
