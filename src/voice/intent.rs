use std::collections::HashMap;

/// Normalized command identifier derived from recognized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Start,
    StartRoutine,
    Pause,
    Stop,
    Next,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::StartRoutine => "start_routine",
            Intent::Pause => "pause",
            Intent::Stop => "stop",
            Intent::Next => "next",
        }
    }

    /// Start and Stop are always dispatchable; everything else only makes
    /// sense against an existing (active or paused) session.
    pub fn requires_session(&self) -> bool {
        matches!(self, Intent::Pause | Intent::Next)
    }
}

/// Utterance-to-intent lookup: an exact-phrase synonym table with a
/// longest-contained-phrase fallback for utterances that embed a known
/// phrase ("please pause" still pauses).
pub struct PhraseMap {
    phrases: HashMap<String, Intent>,
}

impl PhraseMap {
    pub fn empty() -> Self {
        Self {
            phrases: HashMap::new(),
        }
    }

    /// Register a synonym. The phrase is normalized the same way
    /// utterances are at lookup time.
    pub fn register(&mut self, phrase: &str, intent: Intent) {
        self.phrases.insert(normalize(phrase), intent);
    }

    pub fn map(&self, utterance: &str) -> Option<Intent> {
        let normalized = normalize(utterance);
        if normalized.is_empty() {
            return None;
        }
        if let Some(intent) = self.phrases.get(&normalized) {
            return Some(*intent);
        }

        // Fallback: longest registered phrase contained in the utterance
        // wins, so "start routine" beats "start".
        let mut candidates: Vec<(&String, &Intent)> = self.phrases.iter().collect();
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        candidates
            .into_iter()
            .find(|(phrase, _)| normalized.contains(phrase.as_str()))
            .map(|(_, intent)| *intent)
    }
}

impl Default for PhraseMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for (phrase, intent) in [
            ("start", Intent::Start),
            ("begin", Intent::Start),
            ("start workout", Intent::Start),
            ("start routine", Intent::StartRoutine),
            ("begin routine", Intent::StartRoutine),
            ("pause", Intent::Pause),
            ("hold on", Intent::Pause),
            ("take a break", Intent::Pause),
            ("stop", Intent::Stop),
            ("finish", Intent::Stop),
            ("end workout", Intent::Stop),
            ("next", Intent::Next),
            ("next exercise", Intent::Next),
            ("switch", Intent::Next),
        ] {
            map.register(phrase, intent);
        }
        map
    }
}

/// Lowercase, trim, and collapse internal whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
