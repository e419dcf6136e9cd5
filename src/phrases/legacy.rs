use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;

use super::{lowest_unused, PhraseId, PhraseRecord, UNSET_SCENE};

/// A record as found in the slot, before normalization.
#[derive(Debug, Deserialize)]
pub(crate) struct StoredPhrase {
    #[serde(default)]
    id: Option<PhraseId>,
    english: String,
    chinese: String,
    #[serde(default)]
    scene: Option<String>,
    #[serde(
        default,
        rename = "audioUrl",
        with = "::serde_with::rust::double_option"
    )]
    audio_url: Option<Option<serde_json::Value>>,
}

#[derive(Debug, Default)]
pub(crate) struct Normalized {
    pub records: IndexMap<PhraseId, PhraseRecord>,
    pub backfilled_scenes: usize,
    pub stripped_audio: usize,
    pub reassigned_ids: usize,
}

impl Normalized {
    pub fn changed(&self) -> bool {
        self.backfilled_scenes + self.stripped_audio + self.reassigned_ids > 0
    }
}

pub(crate) fn parse(raw: &str) -> Result<Vec<StoredPhrase>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Backfills missing scenes, drops `audioUrl`, and gives colliding or missing
/// ids fresh values above the largest id present, or the lowest unused id
/// once that would overflow. Order is preserved.
pub(crate) fn normalize(stored: Vec<StoredPhrase>) -> Normalized {
    let reserved: HashSet<PhraseId> = stored.iter().filter_map(|phrase| phrase.id).collect();
    let mut next_free = reserved.iter().max().map_or(Some(1), |max| max.checked_add(1));
    let mut out = Normalized::default();

    for phrase in stored {
        if phrase.audio_url.is_some() {
            out.stripped_audio += 1;
        }
        let scene = match phrase.scene {
            Some(scene) if !scene.is_empty() => scene,
            _ => {
                out.backfilled_scenes += 1;
                UNSET_SCENE.to_string()
            }
        };
        let id = match phrase.id {
            Some(id) if !out.records.contains_key(&id) => id,
            _ => {
                out.reassigned_ids += 1;
                let in_use = reserved.len() + out.records.len();
                let taken = |id: PhraseId| reserved.contains(&id) || out.records.contains_key(&id);
                let id = match next_free {
                    Some(id) if !taken(id) => id,
                    _ => lowest_unused(in_use, taken),
                };
                next_free = id.checked_add(1);
                id
            }
        };
        out.records.insert(
            id,
            PhraseRecord {
                id,
                english: phrase.english,
                chinese: phrase.chinese,
                scene,
            },
        );
    }
    out
}
