use crate::phrases::{PhraseRecord, UNSET_SCENE};

/// A scene filter: trimmed and lower-cased once, matched as a substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneQuery {
    raw: String,
    folded: String,
}

impl SceneQuery {
    pub fn new(input: &str) -> Self {
        let trimmed = input.trim();
        Self {
            raw: trimmed.to_string(),
            folded: trimmed.to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }

    /// The trimmed text as typed, for display and highlighting.
    pub fn text(&self) -> &str {
        &self.raw
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn matches(&self, scene: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        let scene = if scene.is_empty() { UNSET_SCENE } else { scene };
        scene.to_lowercase().contains(&self.folded)
    }
}

/// Keeps collection order; an empty query keeps everything.
pub fn filter_phrases<'a, I>(phrases: I, query: &SceneQuery) -> Vec<&'a PhraseRecord>
where
    I: IntoIterator<Item = &'a PhraseRecord>,
{
    phrases
        .into_iter()
        .filter(|phrase| query.matches(&phrase.scene))
        .collect()
}
