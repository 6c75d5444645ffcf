//! In-memory remote tier with fault injection.
//!
//! Used by tests and dry runs. Faults are either one-shot (`fail_next_put`)
//! or pinned to specific hashes, so a test can break exactly one object in a
//! batch and watch the rest go through.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use super::{DEFAULT_MAX_OBJECT_SIZE, ObjectStream, RemoteClient, RemoteKind, RemoteObjectMeta};
use crate::{
    errors::{TierError, TierResult},
    models::ContentHash,
};

/// Fault switches. One-shot flags reset after they fire.
#[derive(Debug, Clone, Default)]
pub struct RemoteFaults {
    pub fail_next_put: bool,
    pub fail_next_get: bool,
    pub fail_next_delete: bool,
    /// Store a flipped byte on the next put, so verification fails.
    pub corrupt_next_put: bool,
    /// Every put of these hashes fails.
    pub fail_put_for: HashSet<ContentHash>,
    /// Every head/verify of these hashes fails.
    pub fail_head_for: HashSet<ContentHash>,
    /// Every put of these hashes stores corrupted bytes.
    pub corrupt_put_for: HashSet<ContentHash>,
}

#[derive(Default)]
struct State {
    objects: HashMap<ContentHash, Bytes>,
    faults: RemoteFaults,
    puts: u64,
    deletes: u64,
}

#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
    max_object_size: u64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }

    pub fn with_max_object_size(mut self, limit: u64) -> Self {
        self.max_object_size = limit;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the fault configuration.
    pub fn set_faults(&self, faults: RemoteFaults) {
        self.state().faults = faults;
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut RemoteFaults)) {
        f(&mut self.state().faults);
    }

    /// Bytes stored under `hash`, bypassing faults.
    pub fn stored(&self, hash: &ContentHash) -> Option<Bytes> {
        self.state().objects.get(hash).cloned()
    }

    /// Place bytes directly, bypassing faults.
    pub fn insert(&self, hash: &ContentHash, data: impl Into<Bytes>) {
        self.state().objects.insert(hash.clone(), data.into());
    }

    /// Drop bytes directly, bypassing faults.
    pub fn remove(&self, hash: &ContentHash) {
        self.state().objects.remove(hash);
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Number of successful puts so far.
    pub fn put_count(&self) -> u64 {
        self.state().puts
    }

    pub fn delete_count(&self) -> u64 {
        self.state().deletes
    }
}

fn meta_of(data: &Bytes) -> RemoteObjectMeta {
    RemoteObjectMeta {
        size: data.len() as u64,
        md5: format!("{:x}", md5::compute(data)),
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    fn kind(&self) -> RemoteKind {
        RemoteKind::Memory
    }

    async fn put(&self, hash: &ContentHash, stream: ObjectStream) -> TierResult<RemoteObjectMeta> {
        {
            let mut state = self.state();
            if std::mem::take(&mut state.faults.fail_next_put)
                || state.faults.fail_put_for.contains(hash)
            {
                return Err(TierError::remote("put", hash, "injected put failure"));
            }
        }

        let body = stream
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok::<_, std::io::Error>(acc)
            })
            .await
            .map_err(|err| TierError::remote("put", hash, err))?;

        // What the client sent, not what we end up storing.
        let meta = meta_of(&body.clone().freeze());

        let mut state = self.state();
        let mut stored = body;
        if (std::mem::take(&mut state.faults.corrupt_next_put)
            || state.faults.corrupt_put_for.contains(hash))
            && !stored.is_empty()
        {
            stored[0] ^= 0xff;
        }
        state.objects.insert(hash.clone(), stored.freeze());
        state.puts += 1;
        Ok(meta)
    }

    async fn get(&self, hash: &ContentHash) -> TierResult<ObjectStream> {
        let mut state = self.state();
        if std::mem::take(&mut state.faults.fail_next_get) {
            return Err(TierError::remote("get", hash, "injected get failure"));
        }
        let data = state
            .objects
            .get(hash)
            .cloned()
            .ok_or_else(|| TierError::RemoteMissing {
                hash: hash.to_string(),
            })?;
        Ok(stream::iter(vec![Ok(data)]).boxed())
    }

    async fn delete(&self, hash: &ContentHash) -> TierResult<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.faults.fail_next_delete) {
            return Err(TierError::remote("delete", hash, "injected delete failure"));
        }
        if state.objects.remove(hash).is_some() {
            state.deletes += 1;
        }
        Ok(())
    }

    async fn head(&self, hash: &ContentHash) -> TierResult<Option<RemoteObjectMeta>> {
        let state = self.state();
        if state.faults.fail_head_for.contains(hash) {
            return Err(TierError::remote("head", hash, "injected head failure"));
        }
        Ok(state.objects.get(hash).map(meta_of))
    }

    fn max_object_size(&self) -> u64 {
        self.max_object_size
    }
}
