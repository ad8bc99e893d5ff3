mod availability;
mod conflict;
mod error;
mod ledger;
mod lifecycle;
mod mutations;
mod queries;
mod slots;
mod store;

pub use availability::{merge_overlapping, subtract_intervals, AvailabilityReport, AvailabilityRequest};
pub use conflict::find_conflict;
pub use error::{EngineError, ErrorKind};
pub use ledger::{plan_consumption, usable_balance, NewLot};
pub use lifecycle::{Attendance, NewSeries, NewSession, NO_SHOW_REASON};
pub use queries::ResourceInfo;
pub use slots::{score, MatchQuality, OpenSlot, OpenSlotSearch, SlotCandidate, SlotPreference, SlotResults, SlotSearch};
pub use store::{Locked, ReadLocked, ResourceGuards, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::limits::DEFAULT_LOCK_TIMEOUT_MS;
use crate::model::*;
use crate::time::TimeNormalizer;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                // Non-append commands run only after the appends queued before them.
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::warn!("WAL flush failed for {} events: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub zone: Tz,
    /// Upper bound on waiting for resource locks before failing with `Concurrency`.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            zone: Tz::UTC,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

/// One tenant's scheduling state.
pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    normalizer: TimeNormalizer,
    lock_timeout: Duration,
    /// Shared by every commit; compaction takes it exclusively.
    commit_gate: Arc<RwLock<()>>,
    /// Serializes registry inserts (new resources and subjects).
    pub(super) registry: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, zone: Tz) -> io::Result<Self> {
        Self::with_options(wal_path, EngineOptions { zone, ..EngineOptions::default() })
    }

    pub fn with_options(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::default(),
            wal_tx,
            normalizer: TimeNormalizer::new(options.zone),
            lock_timeout: options.lock_timeout,
            commit_gate: Arc::new(RwLock::new(())),
            registry: Mutex::new(()),
        };

        // We're the sole owner of every lock here, so try_write always succeeds.
        // Never block: this may run inside an async context (lazy tenant creation).
        for event in &events {
            let ids = engine.store.involved_resources(event);
            let mut locked = Locked::try_acquire(&engine.store, ids)
                .map_err(|_| io::Error::other("replay: resource lock contended"))?;
            engine.store.apply(event, &mut locked);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events ({} resources, {} sessions) from {}",
                events.len(),
                engine.store.resource_count(),
                engine.store.sessions.len(),
                wal_path.display()
            );
        }

        Ok(engine)
    }

    pub fn normalizer(&self) -> &TimeNormalizer {
        &self.normalizer
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn commit(&self, event: Event, locked: &mut Locked) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.store.apply(&event, locked);
        Ok(())
    }

    fn lock_timeout_error(&self) -> EngineError {
        EngineError::Concurrency(format!(
            "timed out after {}ms waiting for resource locks",
            self.lock_timeout.as_millis()
        ))
    }

    fn resolve(&self, resources: &[(Ulid, ResourceKind)]) -> Result<Vec<(Ulid, ResourceKind, SharedResourceState)>, EngineError> {
        let mut wanted = resources.to_vec();
        wanted.sort_by_key(|(id, _)| *id);
        wanted.dedup_by_key(|(id, _)| *id);
        wanted
            .into_iter()
            .map(|(id, kind)| {
                self.store
                    .get_resource(&id)
                    .map(|rs| (id, kind, rs))
                    .ok_or_else(|| EngineError::not_found(kind, id))
            })
            .collect()
    }

    /// Write-lock resources in ascending id order and check their kinds.
    /// The returned set also holds the commit gate.
    pub(super) async fn lock_many(&self, resources: &[(Ulid, ResourceKind)]) -> Result<Locked, EngineError> {
        let resolved = self.resolve(resources)?;
        let acquire = async {
            let gate = self.commit_gate.clone().read_owned().await;
            let mut guards = Vec::with_capacity(resolved.len());
            for (id, _, rs) in &resolved {
                guards.push((*id, rs.clone().write_owned().await));
            }
            (gate, guards)
        };
        let (gate, guards) = tokio::time::timeout(self.lock_timeout, acquire)
            .await
            .map_err(|_| self.lock_timeout_error())?;
        for ((id, kind, _), (_, guard)) in resolved.iter().zip(&guards) {
            if guard.kind != *kind {
                return Err(EngineError::not_found(*kind, *id));
            }
        }
        Ok(Locked::new(Some(gate), guards))
    }

    /// Read-lock resources in ascending id order and check their kinds.
    pub(super) async fn read_many(&self, resources: &[(Ulid, ResourceKind)]) -> Result<ReadLocked, EngineError> {
        let resolved = self.resolve(resources)?;
        let acquire = async {
            let mut guards = Vec::with_capacity(resolved.len());
            for (id, _, rs) in &resolved {
                guards.push((*id, rs.clone().read_owned().await));
            }
            guards
        };
        let guards = tokio::time::timeout(self.lock_timeout, acquire)
            .await
            .map_err(|_| self.lock_timeout_error())?;
        for ((id, kind, _), (_, guard)) in resolved.iter().zip(&guards) {
            if guard.kind != *kind {
                return Err(EngineError::not_found(*kind, *id));
            }
        }
        Ok(ReadLocked::new(guards))
    }

    /// Lock a session's resources, then re-read the session under the locks.
    pub(super) async fn lock_session(&self, session_id: Ulid) -> Result<(Locked, Session), EngineError> {
        let session = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })?;
        let locked = self.lock_many(&session_participants(&session)).await?;
        let current = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })?;
        Ok((locked, current))
    }

    /// Hold the commit gate exclusively. No commit can run until the guard drops.
    pub(super) async fn exclusive_gate(&self) -> tokio::sync::OwnedRwLockWriteGuard<()> {
        self.commit_gate.clone().write_owned().await
    }
}

pub(crate) fn session_participants(session: &Session) -> Vec<(Ulid, ResourceKind)> {
    let mut out = vec![
        (session.instructor_id, ResourceKind::Instructor),
        (session.student_id, ResourceKind::Student),
    ];
    out.extend(session.classroom_id.map(|c| (c, ResourceKind::Classroom)));
    out
}
