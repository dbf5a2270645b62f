//! Response language selection and persona text.

use std::fmt;
use std::str::FromStr;

const PERSONA: &str = "You are a voice-first desktop assistant. \
Speak naturally and keep answers short enough to listen to. \
Use the available tools for weather, system status, public data searches, \
news headlines and opening applications instead of guessing. \
When a tool returns data, summarise it conversationally.";

/// Language the model is instructed to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageMode {
    #[default]
    English,
    Urdu,
    Hindi,
}

impl LanguageMode {
    pub const ALL: [LanguageMode; 3] = [Self::English, Self::Urdu, Self::Hindi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Urdu => "urdu",
            Self::Hindi => "hindi",
        }
    }

    /// Instruction injected verbatim into the persona.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::English => "Always respond in English.",
            Self::Urdu => "Always respond in Urdu, written in Urdu script (اردو).",
            Self::Hindi => "Always respond in Hindi, written in Devanagari script (हिन्दी).",
        }
    }

    /// Full system instruction for a session in this language.
    pub fn persona(&self) -> String {
        format!("{}\n\nLanguage: {}", PERSONA, self.directive())
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown language mode '{}' (expected english, urdu or hindi)", s))
    }
}
