use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{merge_patch, Document, DocumentStore, Filter, StoreError, WriteBatch, WriteOp};

/// Deterministic failures injected into the in-process store.
#[derive(Debug, Default)]
struct Faults {
    fail_next_commit: bool,
    fail_commit_after: Option<usize>,
    fail_commits_touching: Option<String>,
    fail_queries: bool,
}

#[derive(Debug, Default)]
struct State {
    docs: BTreeMap<(String, Uuid), Document>,
    faults: Faults,
    commits: u64,
}

/// In-process document store.
///
/// Commits are staged on a copy of the current state and swapped in only when
/// every write succeeded, so a failing batch leaves nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail before anything is staged.
    pub async fn fail_next_commit(&self) {
        self.state.write().await.faults.fail_next_commit = true;
    }

    /// Make the next commit fail after `writes` operations were staged.
    pub async fn fail_commit_after(&self, writes: usize) {
        self.state.write().await.faults.fail_commit_after = Some(writes);
    }

    /// Fail every commit that writes to `collection` until cleared.
    pub async fn fail_commits_touching(&self, collection: Option<&str>) {
        self.state.write().await.faults.fail_commits_touching = collection.map(str::to_string);
    }

    /// Make queries fail until switched off.
    pub async fn fail_queries(&self, fail: bool) {
        self.state.write().await.faults.fail_queries = fail;
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .docs
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }

    /// Number of successful commits so far.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }
}

fn apply(
    docs: &mut BTreeMap<(String, Uuid), Document>,
    op: WriteOp,
) -> Result<(), StoreError> {
    let now = Utc::now();
    match op {
        WriteOp::Create {
            collection,
            id,
            data,
        } => {
            let key = (collection, id);
            if docs.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!("{}/{}", key.0, id)));
            }
            docs.insert(
                key,
                Document {
                    id,
                    data,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        WriteOp::Update {
            collection,
            id,
            patch,
            precondition,
        } => {
            let doc = docs
                .get_mut(&(collection.clone(), id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            if let Some(pre) = precondition {
                if !pre.holds(&doc.data) {
                    return Err(StoreError::PreconditionFailed(format!(
                        "{}/{}: {}",
                        collection, id, pre
                    )));
                }
            }
            merge_patch(&mut doc.data, &patch)?;
            doc.updated_at = now;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state.docs.get(&(collection.to_string(), id)).cloned())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        if state.faults.fail_queries {
            return Err(StoreError::Unavailable("injected query failure".to_string()));
        }

        let mut found: Vec<Document> = state
            .docs
            .iter()
            .filter(|((c, _), doc)| c == collection && filter.matches(&doc.data))
            .map(|(_, doc)| doc.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if std::mem::take(&mut state.faults.fail_next_commit) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        if let Some(collection) = &state.faults.fail_commits_touching {
            if batch.touches(collection) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure for writes to {}",
                    collection
                )));
            }
        }
        let fail_after = state.faults.fail_commit_after.take();

        let mut staged = state.docs.clone();
        for (idx, op) in batch.into_ops().into_iter().enumerate() {
            if fail_after == Some(idx) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure after {} staged writes",
                    idx
                )));
            }
            apply(&mut staged, op)?;
        }

        state.docs = staged;
        state.commits += 1;
        Ok(())
    }
}
