use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the companion should pitch its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportStyle {
    /// Let the model infer a style from the conversation.
    #[default]
    Auto,
    Gentle,
    Practical,
    Minimal,
}

impl SupportStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportStyle::Auto => "auto",
            SupportStyle::Gentle => "gentle",
            SupportStyle::Practical => "practical",
            SupportStyle::Minimal => "minimal",
        }
    }

    /// The preference to send with a chat request; `Auto` sends none.
    pub fn preference(self) -> Option<Self> {
        (self != SupportStyle::Auto).then_some(self)
    }
}

impl fmt::Display for SupportStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SupportStyle::Auto),
            "gentle" => Ok(SupportStyle::Gentle),
            "practical" => Ok(SupportStyle::Practical),
            "minimal" => Ok(SupportStyle::Minimal),
            other => Err(format!("unknown support style '{}'", other)),
        }
    }
}
