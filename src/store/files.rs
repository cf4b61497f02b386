//! File-backed store.
//!
//! ## Layout
//!
//! | Path | Format | Contents |
//! |------|--------|----------|
//! | `--sources` file | YAML | list of sources, bare or under a `sources:` key |
//! | `<state>/health.json` | JSON object | source id -> health state |
//! | `<state>/candidates.jsonl` | JSON Lines | one candidate per line, unique on URL |
//! | `<state>/telemetry.jsonl` | JSON Lines | method outcomes and site failures |
//!
//! Whole-file rewrites go through a temporary sibling and a rename. A single
//! async mutex serialises read-modify-write cycles within one process;
//! separate processes sharing a state dir can still lose updates.
//!
//! `candidates.jsonl` is read once per store and then served from an
//! in-memory index keyed on URL, so an upsert only appends a line. Source
//! ids are cached from the last sources load and re-read on a miss.
//!
//! Health entries that do not match the typed layout are read through
//! [`HealthState::from_legacy`] and rewritten typed on the next save.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{TelemetryKind, TelemetryRecord, effectiveness_from};
use crate::error::StoreError;
use crate::interfaces::{CandidateSink, MethodEffectiveness, SourceFilter, SourcePersistence, TelemetrySink};
use crate::models::{CandidateUrl, DiscoveryMethod, HealthState, Source};

const HEALTH_FILE: &str = "health.json";
const CANDIDATES_FILE: &str = "candidates.jsonl";
const TELEMETRY_FILE: &str = "telemetry.jsonl";

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SourcesDoc {
    List(Vec<Source>),
    Wrapped { sources: Vec<Source> },
}

/// Candidates in file order plus a URL lookup.
#[derive(Debug, Default)]
struct CandidateIndex {
    entries: Vec<CandidateUrl>,
    by_url: HashMap<String, usize>,
}

impl CandidateIndex {
    fn new(lines: Vec<CandidateUrl>) -> Self {
        let mut index = Self::default();
        for candidate in lines {
            match index.by_url.get(&candidate.url) {
                Some(&i) => index.entries[i] = candidate,
                None => {
                    index.by_url.insert(candidate.url.clone(), index.entries.len());
                    index.entries.push(candidate);
                }
            }
        }
        index
    }
}

pub struct FileStore {
    sources_path: PathBuf,
    state_dir: PathBuf,
    write_lock: Mutex<()>,
    source_ids: Mutex<HashSet<String>>,
    candidates: Mutex<Option<CandidateIndex>>,
}

impl FileStore {
    /// Open a store, creating the state directory if needed.
    #[instrument(level = "info", skip_all, fields(sources = %sources_path.as_ref().display(), state = %state_dir.as_ref().display()))]
    pub async fn open(sources_path: impl AsRef<Path>, state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(state_dir.as_ref()).await?;
        Ok(Self {
            sources_path: sources_path.as_ref().to_path_buf(),
            state_dir: state_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            source_ids: Mutex::new(HashSet::new()),
            candidates: Mutex::new(None),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.state_dir.join(name)
    }

    pub async fn load_sources(&self) -> Result<Vec<Source>, StoreError> {
        let raw = fs::read_to_string(&self.sources_path).await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let sources = match serde_yaml::from_str::<SourcesDoc>(&raw)? {
            SourcesDoc::List(sources) | SourcesDoc::Wrapped { sources } => sources,
        };
        debug!(count = sources.len(), "Loaded sources");
        *self.source_ids.lock().await = sources.iter().map(|s| s.id.clone()).collect();
        Ok(sources)
    }

    async fn ensure_known(&self, source_id: &str) -> Result<(), StoreError> {
        if self.source_ids.lock().await.contains(source_id) {
            return Ok(());
        }
        if self.load_sources().await?.iter().any(|s| s.id == source_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownSource(source_id.to_string()))
        }
    }

    /// Load the candidate index into `slot` on first use.
    async fn candidate_index<'a>(
        &self,
        slot: &'a mut Option<CandidateIndex>,
    ) -> Result<&'a mut CandidateIndex, StoreError> {
        let index = match slot.take() {
            Some(index) => index,
            None => {
                let index = CandidateIndex::new(self.read_lines(CANDIDATES_FILE).await?);
                debug!(count = index.entries.len(), "Loaded candidate index");
                index
            }
        };
        Ok(slot.insert(index))
    }

    async fn load_health(&self) -> Result<BTreeMap<String, HealthState>, StoreError> {
        let bytes = match fs::read(self.path(HEALTH_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let raw: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
        Ok(raw
            .into_iter()
            .map(|(id, value)| {
                let health = match serde_json::from_value::<HealthState>(value.clone()) {
                    Ok(health) => health,
                    Err(e) => {
                        debug!(source_id = %id, error = %e, "Reading legacy health entry");
                        HealthState::from_legacy(&value)
                    }
                };
                (id, health)
            })
            .collect())
    }

    async fn save_health(&self, health: &BTreeMap<String, HealthState>) -> Result<(), StoreError> {
        write_atomic(&self.path(HEALTH_FILE), &serde_json::to_vec_pretty(health)?).await
    }

    async fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let raw = match fs::read_to_string(self.path(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(file = name, line = n + 1, error = %e, "Skipping malformed line");
                    None
                }
            })
            .collect())
    }

    async fn append_line<T: Serialize>(&self, name: &str, item: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rewrite_lines<T: Serialize>(&self, name: &str, items: &[T]) -> Result<(), StoreError> {
        let mut out = Vec::new();
        for item in items {
            out.extend(serde_json::to_vec(item)?);
            out.push(b'\n');
        }
        write_atomic(&self.path(name), &out).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SourcePersistence for FileStore {
    async fn list_due_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>> {
        let health = self.load_health().await?;
        Ok(self
            .load_sources()
            .await?
            .into_iter()
            .map(|mut source| {
                source.health = health.get(&source.id).cloned().unwrap_or_default();
                source
            })
            .filter(|s| filter.matches(s))
            .collect())
    }

    async fn read_health(&self, source_id: &str) -> Result<HealthState> {
        self.ensure_known(source_id).await?;
        Ok(self.load_health().await?.remove(source_id).unwrap_or_default())
    }

    async fn write_health(&self, source_id: &str, health: &HealthState) -> Result<()> {
        self.ensure_known(source_id).await?;
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_health().await?;
        all.insert(source_id.to_string(), health.clone());
        self.save_health(&all).await?;
        Ok(())
    }
}

#[async_trait]
impl CandidateSink for FileStore {
    async fn upsert(&self, candidate: &CandidateUrl) -> Result<bool> {
        let mut slot = self.candidates.lock().await;
        let index = self.candidate_index(&mut slot).await?;
        match index.by_url.get(&candidate.url).copied() {
            Some(i) if index.entries[i] == *candidate => Ok(false),
            Some(i) => {
                index.entries[i] = candidate.clone();
                self.rewrite_lines(CANDIDATES_FILE, &index.entries).await?;
                Ok(false)
            }
            None => {
                self.append_line(CANDIDATES_FILE, candidate).await?;
                index.by_url.insert(candidate.url.clone(), index.entries.len());
                index.entries.push(candidate.clone());
                Ok(true)
            }
        }
    }

    async fn known_urls(&self, source_id: &str) -> Result<HashSet<String>> {
        let mut slot = self.candidates.lock().await;
        let index = self.candidate_index(&mut slot).await?;
        Ok(index
            .entries
            .iter()
            .filter(|c| c.source_id == source_id)
            .map(|c| c.url.clone())
            .collect())
    }
}

#[async_trait]
impl TelemetrySink for FileStore {
    async fn record_method_outcome(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        status: &str,
        article_count: usize,
        elapsed_ms: u64,
    ) -> Result<()> {
        let record = TelemetryRecord {
            at: Utc::now(),
            kind: TelemetryKind::MethodOutcome,
            source_id: source_id.to_string(),
            method,
            status: Some(status.to_string()),
            article_count,
            error: None,
            elapsed_ms,
        };
        let _guard = self.write_lock.lock().await;
        self.append_line(TELEMETRY_FILE, &record).await?;
        Ok(())
    }

    async fn record_site_failure(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        error: &str,
        elapsed_ms: u64,
    ) -> Result<()> {
        let record = TelemetryRecord {
            at: Utc::now(),
            kind: TelemetryKind::SiteFailure,
            source_id: source_id.to_string(),
            method,
            status: None,
            article_count: 0,
            error: Some(error.to_string()),
            elapsed_ms,
        };
        let _guard = self.write_lock.lock().await;
        self.append_line(TELEMETRY_FILE, &record).await?;
        Ok(())
    }

    async fn method_effectiveness(&self, source_id: &str) -> Result<Option<MethodEffectiveness>> {
        let records: Vec<TelemetryRecord> = self.read_lines(TELEMETRY_FILE).await?;
        Ok(effectiveness_from(&records, source_id))
    }
}
