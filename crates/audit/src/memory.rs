use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_types::{DispatchRecord, RecordId};
use futures_util::{StreamExt, stream};
use tokio::sync::RwLock;

use crate::{AuditStore, AuditStoreError, RecordFilter, RecordStream};

type Partition = Arc<RwLock<Vec<DispatchRecord>>>;

/// In-memory audit store partitioned by provider slug, primarily used for
/// tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    partitions: RwLock<BTreeMap<String, Partition>>,
    index: Mutex<HashMap<RecordId, String>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all partitions.
    pub async fn len(&self) -> usize {
        let partitions: Vec<Partition> = self.partitions.read().await.values().cloned().collect();
        let mut total = 0;
        for partition in partitions {
            total += partition.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn partition(&self, provider: &str) -> Partition {
        if let Some(partition) = self.partitions.read().await.get(provider) {
            return partition.clone();
        }
        let mut partitions = self.partitions.write().await;
        partitions.entry(provider.to_string()).or_default().clone()
    }

    async fn existing_partition(&self, id: RecordId) -> Result<Partition, AuditStoreError> {
        let provider = self
            .index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(AuditStoreError::NotFound(id))?;
        self.partitions
            .read()
            .await
            .get(&provider)
            .cloned()
            .ok_or(AuditStoreError::NotFound(id))
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: DispatchRecord) -> Result<RecordId, AuditStoreError> {
        let id = record.id;
        let partition = self.partition(&record.provider).await;
        let mut records = partition.write().await;
        {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            if index.contains_key(&id) {
                return Err(AuditStoreError::Duplicate(id));
            }
            index.insert(id, record.provider.clone());
        }
        records.push(record);
        Ok(id)
    }

    async fn find(&self, id: RecordId) -> Result<DispatchRecord, AuditStoreError> {
        let partition = self.existing_partition(id).await?;
        let records = partition.read().await;
        records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or(AuditStoreError::NotFound(id))
    }

    fn list(&self, filter: RecordFilter) -> RecordStream<'_> {
        let offset = filter.offset;
        let take = filter.take_count();
        let filter = Arc::new(filter);
        let selector = filter.clone();

        stream::once(async move {
            let partitions = self.partitions.read().await;
            partitions
                .iter()
                .filter(|(provider, _)| selector.provider.as_ref().is_none_or(|wanted| wanted == *provider))
                .map(|(_, partition)| partition.clone())
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .then(move |partition| {
            let filter = filter.clone();
            async move {
                let records = partition.read().await;
                records
                    .iter()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect::<Vec<_>>()
            }
        })
        .flat_map(|records| stream::iter(records.into_iter().map(Ok)))
        .skip(offset)
        .take(take)
        .boxed()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditStoreError> {
        let partitions: Vec<Partition> = self.partitions.read().await.values().cloned().collect();
        let mut removed = Vec::new();
        for partition in partitions {
            let mut records = partition.write().await;
            records.retain(|record| {
                let keep = record.created_at >= cutoff;
                if !keep {
                    removed.push(record.id);
                }
                keep
            });
        }
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &removed {
            index.remove(id);
        }
        Ok(removed.len())
    }

    async fn attach_replay(&self, original: RecordId, replay: RecordId) -> Result<(), AuditStoreError> {
        let partition = self.existing_partition(original).await?;
        let mut records = partition.write().await;
        let record = records
            .iter_mut()
            .find(|record| record.id == original)
            .ok_or(AuditStoreError::NotFound(original))?;
        if !record.replays.contains(&replay) {
            record.replays.push(replay);
        }
        Ok(())
    }
}
