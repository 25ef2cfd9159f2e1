use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling priority of a work item.
/// Lower numerical values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Urgent = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    /// Get the raw priority value
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Urgent and High items form the "urgent" slice of a hybrid round
    pub fn is_urgent(&self) -> bool {
        *self <= Priority::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(Priority::Urgent),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            "background" => Some(Priority::Background),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl TryFrom<u8> for Priority {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Urgent),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Normal),
            4 => Ok(Priority::Low),
            5 => Ok(Priority::Background),
            other => Err(other),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.value()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
