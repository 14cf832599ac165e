use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::content_id::{ContentId, IdKind};

/// External ids of one anime entry. Any present id can be used for lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeIds {
    pub imdb: Option<String>,
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
    pub anilist: Option<String>,
    pub mal: Option<String>,
    pub kitsu: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeMapping {
    pub mappings: AnimeIds,
    /// Season of the parent series where this entry begins.
    pub starting_season: Option<u16>,
    /// Absolute episode numbers that exist on anime trackers but not in the
    /// IMDB episode grid (specials aired mid-run).
    pub non_imdb_episodes: BTreeSet<u16>,
    /// Year the entry's season aired; used by the file selector.
    pub season_year: Option<u16>,
}

/// Process-wide, read-only anime id mapping database.
///
/// Loading is deterministic: entries keep file order, the index is rebuilt
/// from scratch, and duplicate ids keep the first entry.
#[derive(Debug, Default)]
pub struct AnimeDb {
    entries: Vec<AnimeMapping>,
    index: HashMap<(IdKind, String), usize>,
}

impl AnimeDb {
    /// Dataset shipped with the binary.
    pub fn bundled() -> Arc<Self> {
        static DATA: &str = include_str!("../../data/anime-mappings.json");
        Arc::new(Self::from_json(DATA).expect("bundled anime dataset is valid"))
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Arc<Self>> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("read anime mappings from {:?}", path.as_ref()))?;
        Ok(Arc::new(Self::from_json(&raw)?))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let entries: Vec<AnimeMapping> =
            serde_json::from_str(raw).context("parse anime mapping entries")?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<AnimeMapping>) -> Self {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let ids = [
                (IdKind::Imdb, &entry.mappings.imdb),
                (IdKind::Tmdb, &entry.mappings.tmdb),
                (IdKind::Tvdb, &entry.mappings.tvdb),
                (IdKind::Anilist, &entry.mappings.anilist),
                (IdKind::Mal, &entry.mappings.mal),
                (IdKind::Kitsu, &entry.mappings.kitsu),
            ];
            for (kind, value) in ids {
                if let Some(value) = value {
                    index.entry((kind, value.clone())).or_insert(i);
                }
            }
        }
        Self { entries, index }
    }

    pub fn lookup(&self, id: &ContentId) -> Option<&AnimeMapping> {
        let i = self.index.get(&(id.kind.clone(), id.value.clone()))?;
        self.entries.get(*i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn db() -> AnimeDb {
        AnimeDb::from_json(
            r#"[
                {
                    "mappings": {"imdb": "tt2560140", "anilist": "16498", "mal": "16498"},
                    "starting_season": 1,
                    "non_imdb_episodes": [14],
                    "season_year": 2013
                },
                {
                    "mappings": {"imdb": "tt2560140", "anilist": "20958"},
                    "starting_season": 2
                }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn lookup_by_any_id() {
        let db = db();
        let by_anilist = db
            .lookup(&ContentId::from_str("anilist:16498").unwrap())
            .unwrap();
        assert_eq!(by_anilist.season_year, Some(2013));
        let by_mal = db.lookup(&ContentId::from_str("mal:16498").unwrap()).unwrap();
        assert_eq!(by_mal.starting_season, Some(1));
        assert!(db.lookup(&ContentId::from_str("anilist:1").unwrap()).is_none());
    }

    #[test]
    fn duplicate_ids_keep_first_entry() {
        let db = db();
        let entry = db
            .lookup(&ContentId::from_str("tt2560140").unwrap())
            .unwrap();
        assert_eq!(entry.starting_season, Some(1));
    }

    #[test]
    fn bundled_dataset_loads() {
        let db = AnimeDb::bundled();
        assert!(!db.is_empty());
    }
}
