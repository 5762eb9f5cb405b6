//! Normalized line states and their presence equivalents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The state vocabulary every notification body is reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    /// No active dialog on the line
    Idle,
    /// A dialog is being set up (trying, proceeding or early)
    Ringing,
    /// A dialog is established, or in a state we do not recognize
    Busy,
    /// The body could not be decoded by any schema variant
    Unknown,
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Idle => "idle",
            LineState::Ringing => "ringing",
            LineState::Busy => "busy",
            LineState::Unknown => "unknown",
        }
    }

    /// Map to the presence pair published for this line.
    ///
    /// Total over every state. `Unknown` fails open to available so a
    /// malformed event never leaves a user marked busy.
    pub fn to_presence(self) -> (Availability, Activity) {
        match self {
            LineState::Idle | LineState::Unknown => (Availability::Available, Activity::Available),
            LineState::Ringing | LineState::Busy => (Availability::Busy, Activity::InACall),
        }
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(LineState::Idle),
            "ringing" => Ok(LineState::Ringing),
            "busy" => Ok(LineState::Busy),
            "unknown" => Ok(LineState::Unknown),
            other => Err(ParseError::UnknownLineState(other.to_string())),
        }
    }
}

/// Base presence availability values accepted by the directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Busy,
    DoNotDisturb,
    BeRightBack,
    Away,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "Available",
            Availability::Busy => "Busy",
            Availability::DoNotDisturb => "DoNotDisturb",
            Availability::BeRightBack => "BeRightBack",
            Availability::Away => "Away",
            Availability::Offline => "Offline",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence activity values accepted by the directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    Available,
    InACall,
    InAConferenceCall,
    Away,
    Presenting,
    UrgentInterruptionsOnly,
    OffWork,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Available => "Available",
            Activity::InACall => "InACall",
            Activity::InAConferenceCall => "InAConferenceCall",
            Activity::Away => "Away",
            Activity::Presenting => "Presenting",
            Activity::UrgentInterruptionsOnly => "UrgentInterruptionsOnly",
            Activity::OffWork => "OffWork",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
