//! Directory of JSON-lines partition files, one per provider.
//!
//! ```text
//! <dir>/
//!   adyen.jsonl      one DispatchRecord per line, append order
//!   stripe.jsonl
//!   lineage.jsonl    {"original": <id>, "replay": <id>} per line
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_types::{DispatchRecord, RecordId};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, Lines, Take};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{AuditStore, AuditStoreError, RecordFilter, RecordStream};

/// Sidecar file holding replay back-references.
pub const LINEAGE_FILE_NAME: &str = "lineage.jsonl";
const PARTITION_EXTENSION: &str = "jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct LineageEntry {
    original: RecordId,
    replay: RecordId,
}

#[derive(Deserialize)]
struct RecordHeader {
    id: RecordId,
}

/// Audit store persisted as partitioned JSONL files.
///
/// Each partition has its own async mutex, so appends for different providers
/// never contend. Reads stream a partition line by line up to the length it
/// had when the read started.
#[derive(Debug)]
pub struct JsonlAuditStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    index: Mutex<HashMap<RecordId, String>>,
    lineage: AsyncMutex<HashMap<RecordId, Vec<RecordId>>>,
}

impl JsonlAuditStore {
    /// Opens (creating if needed) the store rooted at `dir` and indexes existing records.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AuditStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        for partition in list_partitions(&dir).await? {
            let path = partition_path(&dir, &partition);
            let Some(mut lines) = read_lines(&path).await? else {
                continue;
            };
            let mut line_number = 0usize;
            while let Some(line) = lines.next_line().await? {
                line_number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RecordHeader>(&line) {
                    Ok(header) => {
                        index.insert(header.id, partition.clone());
                    }
                    Err(error) => warn!(
                        path = %path.display(),
                        line = line_number,
                        %error,
                        "skipping unparseable audit line"
                    ),
                }
            }
        }

        let lineage = load_lineage(&dir.join(LINEAGE_FILE_NAME)).await?;
        debug!(dir = %dir.display(), records = index.len(), "opened audit store");
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
            index: Mutex::new(index),
            lineage: AsyncMutex::new(lineage),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_for(&self, partition: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(partition.to_string()).or_default().clone()
    }

    fn indexed_partition(&self, id: RecordId) -> Option<String> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    async fn attach_lineage(&self, mut record: DispatchRecord) -> DispatchRecord {
        if let Some(replays) = self.lineage.lock().await.get(&record.id) {
            for replay in replays {
                if !record.replays.contains(replay) {
                    record.replays.push(*replay);
                }
            }
        }
        record
    }

    /// Streams one partition up to the byte length it had when the read began.
    async fn open_reader(&self, partition: &str) -> Result<Option<Lines<BufReader<Take<File>>>>, AuditStoreError> {
        let path = partition_path(&self.dir, partition);
        let lock = self.lock_for(partition);
        let length = {
            let _guard = lock.lock().await;
            match fs::metadata(&path).await {
                Ok(metadata) => metadata.len(),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(error) => return Err(error.into()),
            }
        };
        let file = File::open(&path).await?;
        Ok(Some(BufReader::new(file.take(length)).lines()))
    }

    async fn rewrite_partition(&self, partition: &str, cutoff: DateTime<Utc>) -> Result<Vec<RecordId>, AuditStoreError> {
        let path = partition_path(&self.dir, partition);
        let lock = self.lock_for(partition);
        let _guard = lock.lock().await;

        let Some(mut lines) = read_lines(&path).await? else {
            return Ok(Vec::new());
        };

        let temp_path = path.with_extension("jsonl.tmp");
        let mut kept = BufWriter::new(File::create(&temp_path).await?);
        restrict_permissions(&temp_path).await?;
        let mut removed = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DispatchRecord>(&line) {
                Ok(record) if record.created_at < cutoff => removed.push(record.id),
                _ => {
                    kept.write_all(line.as_bytes()).await?;
                    kept.write_all(b"\n").await?;
                }
            }
        }
        kept.flush().await?;
        drop(kept);

        if removed.is_empty() {
            fs::remove_file(&temp_path).await?;
            return Ok(removed);
        }
        fs::rename(&temp_path, &path).await?;
        Ok(removed)
    }

    async fn prune_lineage(&self, removed: &[RecordId]) -> Result<(), AuditStoreError> {
        let mut lineage = self.lineage.lock().await;
        let before = lineage.len();
        lineage.retain(|original, _| !removed.contains(original));
        if lineage.len() == before {
            return Ok(());
        }

        let mut content = String::new();
        for (original, replays) in lineage.iter() {
            for replay in replays {
                content.push_str(&serde_json::to_string(&LineageEntry {
                    original: *original,
                    replay: *replay,
                })?);
                content.push('\n');
            }
        }
        let path = self.dir.join(LINEAGE_FILE_NAME);
        let temp_path = path.with_extension("jsonl.tmp");
        fs::write(&temp_path, content.as_bytes()).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: DispatchRecord) -> Result<RecordId, AuditStoreError> {
        let id = record.id;
        let partition = partition_name(&record.provider);
        let line = serde_json::to_string(&record)?;

        let lock = self.lock_for(&partition);
        let _guard = lock.lock().await;
        if self.indexed_partition(id).is_some() {
            return Err(AuditStoreError::Duplicate(id));
        }

        let path = partition_path(&self.dir, &partition);
        append_line(&path, &line).await?;
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, partition);
        info!(record_id = %id, provider = %record.provider, endpoint = %record.endpoint, "dispatch record persisted");
        Ok(id)
    }

    async fn find(&self, id: RecordId) -> Result<DispatchRecord, AuditStoreError> {
        let partition = self.indexed_partition(id).ok_or(AuditStoreError::NotFound(id))?;
        let Some(mut lines) = self.open_reader(&partition).await? else {
            return Err(AuditStoreError::NotFound(id));
        };
        while let Some(line) = lines.next_line().await? {
            let Ok(header) = serde_json::from_str::<RecordHeader>(&line) else {
                continue;
            };
            if header.id == id {
                let record = serde_json::from_str::<DispatchRecord>(&line)?;
                return Ok(self.attach_lineage(record).await);
            }
        }
        Err(AuditStoreError::NotFound(id))
    }

    fn list(&self, filter: RecordFilter) -> RecordStream<'_> {
        let offset = filter.offset;
        let take = filter.take_count();
        let state = ListState {
            store: self,
            filter,
            partitions: None,
            lines: None,
        };

        stream::unfold(state, |mut state| async move {
            match state.next_record().await {
                Ok(Some(record)) => Some((Ok(record), state)),
                Ok(None) => None,
                Err(error) => {
                    // Stop after surfacing the error; the partition cursor is no longer trustworthy.
                    state.partitions = Some(VecDeque::new());
                    state.lines = None;
                    Some((Err(error), state))
                }
            }
        })
        .skip(offset)
        .take(take)
        .boxed()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditStoreError> {
        let mut removed = Vec::new();
        for partition in list_partitions(&self.dir).await? {
            let purged = self.rewrite_partition(&partition, cutoff).await?;
            if !purged.is_empty() {
                debug!(partition = %partition, removed = purged.len(), "purged audit partition");
            }
            removed.extend(purged);
        }
        {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            for id in &removed {
                index.remove(id);
            }
        }
        self.prune_lineage(&removed).await?;
        Ok(removed.len())
    }

    async fn attach_replay(&self, original: RecordId, replay: RecordId) -> Result<(), AuditStoreError> {
        if self.indexed_partition(original).is_none() {
            return Err(AuditStoreError::NotFound(original));
        }
        let mut lineage = self.lineage.lock().await;
        let replays = lineage.entry(original).or_default();
        if replays.contains(&replay) {
            return Ok(());
        }
        let line = serde_json::to_string(&LineageEntry { original, replay })?;
        append_line(&self.dir.join(LINEAGE_FILE_NAME), &line).await?;
        replays.push(replay);
        Ok(())
    }
}

struct ListState<'a> {
    store: &'a JsonlAuditStore,
    filter: RecordFilter,
    partitions: Option<VecDeque<String>>,
    lines: Option<Lines<BufReader<Take<File>>>>,
}

impl ListState<'_> {
    async fn next_record(&mut self) -> Result<Option<DispatchRecord>, AuditStoreError> {
        if self.partitions.is_none() {
            let mut partitions: VecDeque<String> = list_partitions(&self.store.dir).await?.into();
            if let Some(provider) = &self.filter.provider {
                let wanted = partition_name(provider);
                partitions.retain(|partition| *partition == wanted);
            }
            self.partitions = Some(partitions);
        }

        loop {
            if let Some(lines) = self.lines.as_mut() {
                match lines.next_line().await? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => match serde_json::from_str::<DispatchRecord>(&line) {
                        Ok(record) if self.filter.matches(&record) => {
                            return Ok(Some(self.store.attach_lineage(record).await));
                        }
                        Ok(_) => continue,
                        Err(error) => {
                            warn!(%error, "skipping unparseable audit line");
                            continue;
                        }
                    },
                    None => self.lines = None,
                }
            }

            let Some(partition) = self.partitions.as_mut().and_then(VecDeque::pop_front) else {
                return Ok(None);
            };
            self.lines = self.store.open_reader(&partition).await?;
        }
    }
}

/// File stem used for a provider partition; anything outside `[A-Za-z0-9_-]` becomes `_`.
fn partition_name(provider: &str) -> String {
    provider
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

fn partition_path(dir: &Path, partition: &str) -> PathBuf {
    dir.join(format!("{partition}.{PARTITION_EXTENSION}"))
}

/// Partition stems in sorted order, excluding the lineage sidecar.
async fn list_partitions(dir: &Path) -> Result<Vec<String>, AuditStoreError> {
    let mut partitions = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(partitions),
        Err(error) => return Err(error.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PARTITION_EXTENSION) {
            continue;
        }
        if path.file_name().and_then(|name| name.to_str()) == Some(LINEAGE_FILE_NAME) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            partitions.push(stem.to_string());
        }
    }
    partitions.sort();
    Ok(partitions)
}

async fn load_lineage(path: &Path) -> Result<HashMap<RecordId, Vec<RecordId>>, AuditStoreError> {
    let mut lineage: HashMap<RecordId, Vec<RecordId>> = HashMap::new();
    let Some(mut lines) = read_lines(path).await? else {
        return Ok(lineage);
    };
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LineageEntry>(&line) {
            Ok(entry) => {
                let replays = lineage.entry(entry.original).or_default();
                if !replays.contains(&entry.replay) {
                    replays.push(entry.replay);
                }
            }
            Err(error) => warn!(path = %path.display(), %error, "skipping unparseable lineage line"),
        }
    }
    Ok(lineage)
}

/// Line reader over `path`, or `None` when the file does not exist.
async fn read_lines(path: &Path) -> Result<Option<Lines<BufReader<File>>>, AuditStoreError> {
    match File::open(path).await {
        Ok(file) => Ok(Some(BufReader::new(file).lines())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), AuditStoreError> {
    let is_new = !fs::try_exists(path).await.unwrap_or(false);
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    if is_new {
        restrict_permissions(path).await?;
    }
    let mut buffer = Vec::with_capacity(line.len() + 1);
    buffer.extend_from_slice(line.as_bytes());
    buffer.push(b'\n');
    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}

async fn restrict_permissions(path: &Path) -> Result<(), AuditStoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
