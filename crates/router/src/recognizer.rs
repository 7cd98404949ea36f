use std::collections::BTreeMap;

use async_trait::async_trait;
use skillrelay_core::config::AppConfig;
use skillrelay_core::errors::ApplicationError;
use skillrelay_core::{Activity, Interruption};

/// Turns an utterance into an intent name and, separately, a global interruption.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize_interruption(
        &self,
        activity: &Activity,
    ) -> Result<Option<Interruption>, ApplicationError>;

    async fn recognize_intent(&self, activity: &Activity) -> Result<Option<String>, ApplicationError>;
}

/// Phrase matcher driven by the `[intents]` and `[interruptions]` config tables.
///
/// Interruptions only fire when the whole utterance is one of their phrases, so
/// "cancel my flight" still reaches intent matching. Intents match on the longest phrase
/// contained in the utterance.
#[derive(Clone, Debug, Default)]
pub struct KeywordRecognizer {
    intents: Vec<(String, String)>,
    interruptions: Vec<(String, Interruption)>,
}

impl KeywordRecognizer {
    pub fn new(
        intents: &BTreeMap<String, Vec<String>>,
        interruptions: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let mut intent_phrases: Vec<(String, String)> = intents
            .iter()
            .flat_map(|(intent, phrases)| {
                phrases.iter().map(move |phrase| (normalize(phrase), intent.clone()))
            })
            .filter(|(phrase, _)| !phrase.is_empty())
            .collect();
        // Longest phrase first; stable sort keeps intent-name order for ties.
        intent_phrases.sort_by(|left, right| right.0.len().cmp(&left.0.len()));

        let interruption_phrases = interruptions
            .iter()
            .filter_map(|(name, phrases)| Interruption::parse(name).map(|kind| (kind, phrases)))
            .flat_map(|(kind, phrases)| phrases.iter().map(move |phrase| (normalize(phrase), kind)))
            .filter(|(phrase, _)| !phrase.is_empty())
            .collect();

        Self { intents: intent_phrases, interruptions: interruption_phrases }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.intents, &config.interruptions)
    }

    fn match_interruption(&self, text: &str) -> Option<Interruption> {
        let utterance = normalize(text);
        self.interruptions
            .iter()
            .find(|(phrase, _)| *phrase == utterance)
            .map(|(_, interruption)| *interruption)
    }

    fn match_intent(&self, text: &str) -> Option<String> {
        let utterance = format!(" {} ", normalize(text));
        self.intents
            .iter()
            .find(|(phrase, _)| utterance.contains(&format!(" {phrase} ")))
            .map(|(_, intent)| intent.clone())
    }
}

#[async_trait]
impl Recognizer for KeywordRecognizer {
    async fn recognize_interruption(
        &self,
        activity: &Activity,
    ) -> Result<Option<Interruption>, ApplicationError> {
        Ok(activity.text().and_then(|text| self.match_interruption(text)))
    }

    async fn recognize_intent(&self, activity: &Activity) -> Result<Option<String>, ApplicationError> {
        Ok(activity.text().and_then(|text| self.match_intent(text)))
    }
}

/// Lowercase, punctuation stripped, whitespace collapsed.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_alphanumeric() || ch.is_whitespace() { ch.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
