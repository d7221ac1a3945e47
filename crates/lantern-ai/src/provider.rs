//! The closed set of AI providers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AIError;

/// An AI backend a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Quantized model run on this machine.
    Local,
    /// OpenAI-compatible endpoint on the user's own server.
    Selfhost,
    Gpt,
    Gemini,
    /// Placeholder without an HTTP integration.
    Copilot,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Local,
        Provider::Selfhost,
        Provider::Gpt,
        Provider::Gemini,
        Provider::Copilot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Selfhost => "selfhost",
            Provider::Gpt => "gpt",
            Provider::Gemini => "gemini",
            Provider::Copilot => "copilot",
        }
    }

    /// Settings field holding this provider's API key.
    pub fn key_field(self) -> Option<&'static str> {
        match self {
            Provider::Local => None,
            Provider::Selfhost => Some("selfhost_api_key"),
            Provider::Gpt => Some("openai_api_key"),
            Provider::Gemini => Some("gemini_api_key"),
            Provider::Copilot => Some("copilot_api_key"),
        }
    }

    pub fn is_remote(self) -> bool {
        self != Provider::Local
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AIError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| AIError::UnsupportedProvider(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(" GPT ".parse::<Provider>().unwrap(), Provider::Gpt);
        assert_eq!("selfhost".parse::<Provider>().unwrap(), Provider::Selfhost);
    }

    #[test]
    fn test_unknown_provider() {
        let err = "claude".parse::<Provider>().unwrap_err();
        assert!(matches!(err, AIError::UnsupportedProvider(p) if p == "claude"));
    }

    #[test]
    fn test_display_round_trips() {
        for provider in Provider::ALL {
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
    }
}
