use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::models::{ResolvedSource, Track};
use crate::music::error::{MusicError, Result};
use crate::music::paste::PasteService;

/// Listings longer than this go to the paste service instead of the channel.
pub const INLINE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarySource {
    #[serde(rename = "url")]
    pub origin: String,
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub live: bool,
}

impl LibrarySource {
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn to_resolved(&self, title: &str) -> ResolvedSource {
        ResolvedSource {
            title: title.to_string(),
            url: self.origin.clone(),
            duration: self.duration(),
            is_live: self.live,
        }
    }
}

impl From<&Track> for LibrarySource {
    fn from(track: &Track) -> Self {
        LibrarySource {
            origin: track.url.clone(),
            duration_secs: track.duration.map(|duration| duration.as_secs()),
            live: track.is_live,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub title: String,
    pub source: LibrarySource,
}

/// Every track ever queued, keyed by title and kept in first-seen order.
#[derive(Debug, Default)]
pub struct MusicLibrary {
    entries: Vec<LibraryEntry>,
    positions: HashMap<String, usize>,
}

pub enum Listing {
    Inline(String),
    Paste { summary: String, body: String },
}

impl MusicLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the source of an existing title in place, or appends a new entry.
    pub fn upsert(&mut self, title: impl Into<String>, source: LibrarySource) {
        let title = title.into();

        match self.positions.get(&title) {
            Some(&position) => self.entries[position].source = source,
            None => {
                self.positions.insert(title.clone(), self.entries.len());
                self.entries.push(LibraryEntry { title, source });
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&LibraryEntry> {
        self.entries.get(index)
    }

    #[cfg(test)]
    pub fn find(&self, title: &str) -> Option<&LibraryEntry> {
        self.positions.get(title).map(|&position| &self.entries[position])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LibraryEntry> {
        self.entries.iter()
    }

    pub fn listing(&self) -> Result<Listing> {
        if self.is_empty() {
            return Err(MusicError::LibraryEmpty);
        }

        let header = format!("__Music Library Status__ (Entries: {})\n\n", self.len());
        let body = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                format!("**{index}** {} **<{}>**", entry.title, entry.source.origin)
            })
            .collect::<Vec<String>>()
            .join("\n");

        if self.len() <= INLINE_LIMIT {
            Ok(Listing::Inline(format!("{header}{body}")))
        } else {
            Ok(Listing::Paste { summary: header, body })
        }
    }
}

impl Listing {
    pub async fn publish(self, paste: &dyn PasteService) -> Result<String> {
        match self {
            Listing::Inline(text) => Ok(text),
            Listing::Paste { summary, body } => {
                let link = paste.post(&body).await?;

                Ok(format!("{summary}{link}"))
            }
        }
    }
}

impl Serialize for MusicLibrary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|entry| (&entry.title, &entry.source)))
    }
}

impl<'de> Deserialize<'de> for MusicLibrary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct LibraryVisitor;

        impl<'de> Visitor<'de> for LibraryVisitor {
            type Value = MusicLibrary;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of track titles to sources")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<MusicLibrary, A::Error> {
                let mut library = MusicLibrary::new();

                while let Some((title, source)) = map.next_entry::<String, LibrarySource>()? {
                    library.upsert(title, source);
                }

                Ok(library)
            }
        }

        deserializer.deserialize_map(LibraryVisitor)
    }
}

/// JSON file holding the library between restarts.
pub struct LibraryStore {
    path: PathBuf,
}

impl LibraryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LibraryStore { path: path.into() }
    }

    pub async fn load(&self) -> Result<MusicLibrary> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(why) if why.kind() == ErrorKind::NotFound => {
                info!("No library at {}, starting empty", self.path.display());
                return Ok(MusicLibrary::new());
            }
            Err(why) => return Err(MusicError::Storage(why.to_string())),
        };

        serde_json::from_slice(&contents).map_err(|why| MusicError::Storage(why.to_string()))
    }

    pub async fn save(&self, library: &MusicLibrary) -> Result<()> {
        let contents =
            serde_json::to_vec_pretty(library).map_err(|why| MusicError::Storage(why.to_string()))?;
        let temp_path = self.path.with_extension("json.tmp");

        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(|why| MusicError::Storage(why.to_string()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|why| MusicError::Storage(why.to_string()))
    }
}

/// The bot-wide library shared by every guild.
pub struct SharedLibrary {
    library: Mutex<MusicLibrary>,
    store: Option<LibraryStore>,
}

impl SharedLibrary {
    pub fn new(library: MusicLibrary, store: Option<LibraryStore>) -> Self {
        SharedLibrary {
            library: Mutex::new(library),
            store,
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(MusicLibrary::new(), None)
    }

    pub async fn lock(&self) -> MutexGuard<'_, MusicLibrary> {
        self.library.lock().await
    }

    /// Writes the current contents out. Holding the lock keeps writes ordered.
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let library = self.library.lock().await;

        if let Err(why) = store.save(&library).await {
            warn!("Saving music library failed: {why}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::async_trait;
    use std::sync::Mutex as StdMutex;

    fn source(url: &str) -> LibrarySource {
        LibrarySource {
            origin: url.to_string(),
            duration_secs: Some(180),
            live: false,
        }
    }

    struct RecordingPaste {
        posted: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl PasteService for RecordingPaste {
        async fn post(&self, text: &str) -> Result<String> {
            self.posted.lock().unwrap().push(text.to_string());
            Ok("https://paste.example.com/xyz".to_string())
        }
    }

    #[test]
    fn upsert_same_title_keeps_one_entry_with_latest_source() {
        let mut library = MusicLibrary::new();

        for round in 0..5 {
            library.upsert("Song", source(&format!("https://example.com/{round}")));
        }

        assert_eq!(library.len(), 1);
        assert_eq!(library.find("Song").unwrap().source.origin, "https://example.com/4");
    }

    #[test]
    fn upsert_keeps_first_insertion_position() {
        let mut library = MusicLibrary::new();
        library.upsert("A", source("https://a"));
        library.upsert("B", source("https://b"));
        library.upsert("A", source("https://a2"));

        let titles: Vec<&str> = library.entries().map(|entry| entry.title.as_str()).collect();

        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(library.get(0).unwrap().source.origin, "https://a2");
    }

    #[test]
    fn empty_library_has_no_listing() {
        let library = MusicLibrary::new();

        assert!(library.is_empty());
        assert!(matches!(library.listing(), Err(MusicError::LibraryEmpty)));
    }

    #[tokio::test]
    async fn small_library_is_listed_inline() {
        let mut library = MusicLibrary::new();
        library.upsert("First", source("https://first"));
        library.upsert("Second", source("https://second"));
        let paste = RecordingPaste { posted: StdMutex::new(Vec::new()) };

        let text = library.listing().unwrap().publish(&paste).await.unwrap();

        assert!(text.starts_with("__Music Library Status__ (Entries: 2)"));
        assert!(text.contains("**0** First **<https://first>**"));
        assert!(text.contains("**1** Second **<https://second>**"));
        assert!(paste.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_library_is_pasted_with_summary() {
        let mut library = MusicLibrary::new();
        for index in 0..15 {
            library.upsert(format!("Track {index}"), source(&format!("https://t/{index}")));
        }
        let paste = RecordingPaste { posted: StdMutex::new(Vec::new()) };

        let text = library.listing().unwrap().publish(&paste).await.unwrap();

        assert_eq!(text, "__Music Library Status__ (Entries: 15)\n\nhttps://paste.example.com/xyz");
        let posted = paste.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].lines().count(), 15);
        assert!(posted[0].starts_with("**0** Track 0"));
    }

    #[test]
    fn json_round_trip_preserves_order() {
        let mut library = MusicLibrary::new();
        library.upsert("Zebra", source("https://z"));
        library.upsert("Alpha", source("https://a"));

        let json = serde_json::to_string(&library).unwrap();
        let restored: MusicLibrary = serde_json::from_str(&json).unwrap();

        let titles: Vec<&str> = restored.entries().map(|entry| entry.title.as_str()).collect();
        assert_eq!(titles, vec!["Zebra", "Alpha"]);
        assert_eq!(
            restored.find("Alpha").unwrap().source.duration(),
            Some(Duration::from_secs(180))
        );
    }

    #[test]
    fn reads_entries_without_optional_fields() {
        let json = r#"{"Old song": {"url": "https://old"}}"#;

        let library: MusicLibrary = serde_json::from_str(json).unwrap();
        let entry = library.find("Old song").unwrap();

        assert_eq!(entry.source.duration_secs, None);
        assert!(!entry.source.live);
    }

    #[tokio::test]
    async fn store_saves_and_loads_from_disk() {
        let path = std::env::temp_dir()
            .join(format!("duba_nano_library_{}.json", std::process::id()));
        let store = LibraryStore::new(&path);
        let mut library = MusicLibrary::new();
        library.upsert("Persisted", source("https://persisted"));

        store.save(&library).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.find("Persisted").unwrap().source.origin, "https://persisted");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_store_file_loads_empty_library() {
        let path = std::env::temp_dir().join("duba_nano_library_does_not_exist.json");
        let store = LibraryStore::new(path);

        assert!(store.load().await.unwrap().is_empty());
    }
}
