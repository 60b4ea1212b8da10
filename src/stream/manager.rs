/*!
 * Stream Manager
 *
 * The capture-resource broker. Reference-counts per-kind consumers,
 * serializes transactional acquisition, and publishes the global stream
 * snapshot to subscribers after every successful transition.
 *
 * All mutation of the stream slots and the consumer ledger flows through two
 * entry points, `request_streams` and `release_streams`, so the consistency
 * invariant (refcount of a kind == number of ledger entries naming it, slot
 * torn down exactly when that count reaches zero) stays enforceable.
 */

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::AcquireError;
use crate::stream::mixer::MixedAudioSource;
use crate::stream::{DeviceAcquirer, GlobalStreamState, StreamHandle, StreamKind};

/// Reserved ledger entry for the audio mixer's holds on the underlying
/// microphone and system-audio tracks.
const MIXER_CONSUMER: &str = "::audio-mixer";

/// Handle returned by `add_listener`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StateListener = Box<dyn Fn(&GlobalStreamState) + Send + Sync>;

#[derive(Default)]
struct Inner {
    /// At most one live stream per kind, regardless of consumer count.
    slots: HashMap<StreamKind, StreamHandle>,
    /// Consumer id -> kinds currently held.
    ledger: HashMap<String, BTreeSet<StreamKind>>,
    /// Last published snapshot, for synchronous reads.
    snapshot: GlobalStreamState,
}

impl Inner {
    fn refcount(&self, kind: StreamKind) -> usize {
        self.ledger
            .values()
            .filter(|held| held.contains(&kind))
            .count()
    }

    fn rebuild_snapshot(&mut self) -> GlobalStreamState {
        let mut next = GlobalStreamState::default();
        for (kind, handle) in &self.slots {
            next.set(*kind, Some(handle.clone()));
        }
        if next.all_audio.is_some() {
            // Sole surfaced audio representation while the mixed track is
            // live; the raw tracks stay open but are not shown.
            next.microphone = None;
            next.screen_audio = None;
        }
        self.snapshot = next.clone();
        next
    }
}

/// Capture-resource broker.
///
/// Owns the global stream slots and the consumer ledger exclusively.
/// Consumers obtain stream handles only through the published snapshots and
/// never open or close devices themselves.
pub struct StreamManager {
    acquirer: Arc<dyn DeviceAcquirer>,
    inner: Mutex<Inner>,
    listeners: Mutex<HashMap<u64, StateListener>>,
    next_listener_id: AtomicU64,
    /// Global acquisition queue: overlapping-kind transactions serialize
    /// here so two first-time requests for one kind cannot race to open two
    /// device handles.
    acquire_gate: AsyncMutex<()>,
}

impl StreamManager {
    pub fn new(acquirer: Arc<dyn DeviceAcquirer>) -> Self {
        Self {
            acquirer,
            inner: Mutex::new(Inner::default()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            acquire_gate: AsyncMutex::new(()),
        }
    }

    /// Acquire every kind in `kinds` for `agent_id`, all-or-nothing.
    ///
    /// Kinds already open are shared; kinds not yet open are acquired through
    /// the device acquirer (or derived by the audio mixer for `allAudio`).
    /// On any failure every stream newly opened during *this* call is stopped
    /// again, no ledger entry is written, and the error propagates; kinds
    /// the agent already held from earlier calls are untouched. Requesting a
    /// kind the agent already holds is idempotent.
    ///
    /// May suspend arbitrarily long on the underlying permission prompt.
    /// There is no cancellation; callers that stop caring should release
    /// after the call settles.
    pub async fn request_streams(
        &self,
        agent_id: &str,
        kinds: &BTreeSet<StreamKind>,
    ) -> Result<(), AcquireError> {
        if kinds.is_empty() {
            warn!(agent = agent_id, "rejecting empty stream request");
            return Err(AcquireError::EmptyRequest);
        }

        let _gate = self.acquire_gate.lock().await;
        debug!(agent = agent_id, requested = ?kinds, "acquisition transaction started");

        let mut staged: HashMap<StreamKind, StreamHandle> = HashMap::new();
        match self.run_transaction(agent_id, kinds, &mut staged).await {
            Ok(snapshot) => {
                info!(agent = agent_id, open = ?snapshot.open_kinds(), "acquisition committed");
                self.notify_listeners(&snapshot);
                Ok(())
            }
            Err(err) => {
                for (kind, handle) in staged.drain() {
                    warn!(%kind, "rolling back stream opened in failed transaction");
                    handle.stop();
                }
                warn!(agent = agent_id, error = %err, "acquisition rolled back");
                Err(err)
            }
        }
    }

    /// Release every kind held by `agent_id`.
    ///
    /// Kinds whose reference count drops to zero have their underlying
    /// capture stopped and their slot cleared. Releasing an agent that holds
    /// nothing is a no-op.
    pub fn release_streams(&self, agent_id: &str) {
        let snapshot = {
            let mut inner = self.inner.lock();
            let Some(held) = inner.ledger.remove(agent_id) else {
                debug!(agent = agent_id, "release with no holdings, no-op");
                return;
            };
            debug!(agent = agent_id, released = ?held, "releasing streams");
            Self::teardown_orphans(&mut inner);
            inner.rebuild_snapshot()
        };
        self.notify_listeners(&snapshot);
    }

    /// Synchronous snapshot of the surfaced stream slots. No side effects.
    pub fn current_state(&self) -> GlobalStreamState {
        self.inner.lock().snapshot.clone()
    }

    /// Kinds currently held by `agent_id` in the ledger.
    pub fn held_kinds(&self, agent_id: &str) -> BTreeSet<StreamKind> {
        self.inner
            .lock()
            .ledger
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to snapshots published after each successful acquisition or
    /// release. Listeners run synchronously on the publishing call and must
    /// not mutate broker state re-entrantly.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GlobalStreamState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Box::new(listener));
        ListenerId(id)
    }

    /// Unsubscribe. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id.0);
    }

    async fn run_transaction(
        &self,
        agent_id: &str,
        kinds: &BTreeSet<StreamKind>,
        staged: &mut HashMap<StreamKind, StreamHandle>,
    ) -> Result<GlobalStreamState, AcquireError> {
        loop {
            let missing: Vec<StreamKind> = {
                let inner = self.inner.lock();
                Self::device_dependencies(kinds, &inner)
                    .into_iter()
                    .filter(|kind| !inner.slots.contains_key(kind) && !staged.contains_key(kind))
                    .collect()
            };

            if missing.is_empty() {
                if let Some(snapshot) = self.try_commit(agent_id, kinds, staged) {
                    return Ok(snapshot);
                }
                // A slot observed open was released while this transaction
                // was suspended on a device call; recompute and reopen.
                continue;
            }

            for kind in missing {
                let handle = self.acquirer.open(kind).await?;
                staged.insert(kind, handle);
            }
        }
    }

    /// Device-level kinds this request needs open: the requested kinds minus
    /// the derived `allAudio`, plus the mixer's two source tracks when the
    /// mixed stream does not exist yet.
    fn device_dependencies(kinds: &BTreeSet<StreamKind>, inner: &Inner) -> BTreeSet<StreamKind> {
        let mut needed: BTreeSet<StreamKind> = kinds
            .iter()
            .copied()
            .filter(|kind| *kind != StreamKind::AllAudio)
            .collect();
        if kinds.contains(&StreamKind::AllAudio)
            && !inner.slots.contains_key(&StreamKind::AllAudio)
        {
            needed.insert(StreamKind::Microphone);
            needed.insert(StreamKind::ScreenAudio);
        }
        needed
    }

    /// Commit the transaction: move staged streams into the slots, derive
    /// the mixed track if needed, write the ledger entries, and publish.
    /// Returns `None` (leaving `staged` intact) when a dependency vanished
    /// between the last check and this lock acquisition.
    fn try_commit(
        &self,
        agent_id: &str,
        kinds: &BTreeSet<StreamKind>,
        staged: &mut HashMap<StreamKind, StreamHandle>,
    ) -> Option<GlobalStreamState> {
        let mut inner = self.inner.lock();

        let needed = Self::device_dependencies(kinds, &inner);
        for kind in &needed {
            if !inner.slots.contains_key(kind) && !staged.contains_key(kind) {
                return None;
            }
        }

        let needs_mixed = kinds.contains(&StreamKind::AllAudio)
            && !inner.slots.contains_key(&StreamKind::AllAudio);
        let mixed_parents = if needs_mixed {
            let lookup = |kind: StreamKind| {
                inner
                    .slots
                    .get(&kind)
                    .cloned()
                    .or_else(|| staged.get(&kind).cloned())
            };
            match (
                lookup(StreamKind::Microphone),
                lookup(StreamKind::ScreenAudio),
            ) {
                (Some(microphone), Some(system)) => Some((microphone, system)),
                _ => return None,
            }
        } else {
            None
        };

        for (kind, handle) in staged.drain() {
            inner.slots.insert(kind, handle);
        }

        if let Some((microphone, system)) = mixed_parents {
            let mixed: StreamHandle = Arc::new(MixedAudioSource::new(microphone, system));
            inner.slots.insert(StreamKind::AllAudio, mixed);
            inner
                .ledger
                .entry(MIXER_CONSUMER.to_string())
                .or_default()
                .extend([StreamKind::Microphone, StreamKind::ScreenAudio]);
        }

        inner
            .ledger
            .entry(agent_id.to_string())
            .or_default()
            .extend(kinds.iter().copied());

        Some(inner.rebuild_snapshot())
    }

    /// Stop every slot whose reference count reached zero, cascading through
    /// the mixer's holds when the mixed track itself goes down.
    fn teardown_orphans(inner: &mut Inner) {
        loop {
            let orphan = inner
                .slots
                .keys()
                .copied()
                .find(|kind| inner.refcount(*kind) == 0);
            let Some(kind) = orphan else { break };

            if kind == StreamKind::AllAudio {
                // Last allAudio consumer left: the mixer releases its taps on
                // the underlying tracks through the normal ledger path.
                inner.ledger.remove(MIXER_CONSUMER);
            }
            if let Some(handle) = inner.slots.remove(&kind) {
                info!(%kind, "stopping capture, no remaining consumers");
                handle.stop();
            }
        }
    }

    fn notify_listeners(&self, snapshot: &GlobalStreamState) {
        let listeners = self.listeners.lock();
        for listener in listeners.values() {
            listener(snapshot);
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for (kind, handle) in inner.slots.drain() {
            debug!(%kind, "stopping capture on manager drop");
            handle.stop();
        }
        inner.ledger.clear();
    }
}
