use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_span;
use super::{Engine, EngineError, ResourceGuards, WalCommand};

fn check_name(name: Option<&str>) -> Result<(), EngineError> {
    match name {
        Some(n) if n.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded("name too long")),
        _ => Ok(()),
    }
}

fn check_window(window: &AvailabilityWindow) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::Validation(format!(
            "window start {} must be before end {}",
            window.start, window.end
        )));
    }
    if let (Some(from), Some(until)) = (window.valid_from, window.valid_until)
        && from > until
    {
        return Err(EngineError::Validation(format!(
            "window valid from {from} is after valid until {until}"
        )));
    }
    check_name(window.category.as_deref())
}

impl Engine {
    // ── Registry ─────────────────────────────────────────────

    async fn register(
        &self,
        id: Ulid,
        kind: ResourceKind,
        name: Option<String>,
        rate_cents: Option<u32>,
    ) -> Result<(), EngineError> {
        check_name(name.as_deref())?;
        let _registry = self.registry.lock().await;
        let mut locked = self.lock_many(&[]).await?;
        if self.store.contains_resource(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.commit(Event::ResourceRegistered { id, kind, name, rate_cents }, &mut locked)
            .await?;
        info!("registered {kind} {id}");
        Ok(())
    }

    pub async fn register_instructor(
        &self,
        id: Ulid,
        name: Option<String>,
        rate_cents: Option<u32>,
    ) -> Result<(), EngineError> {
        self.register(id, ResourceKind::Instructor, name, rate_cents).await
    }

    pub async fn register_student(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        self.register(id, ResourceKind::Student, name, None).await
    }

    pub async fn register_classroom(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        self.register(id, ResourceKind::Classroom, name, None).await
    }

    pub async fn register_subject(&self, id: Ulid, name: String) -> Result<Subject, EngineError> {
        check_name(Some(&name))?;
        let _registry = self.registry.lock().await;
        let mut locked = self.lock_many(&[]).await?;
        if self.store.subjects.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let subject = Subject { id, name };
        self.commit(Event::SubjectRegistered { subject: subject.clone() }, &mut locked)
            .await?;
        Ok(subject)
    }

    // ── Recurring availability ───────────────────────────────

    pub async fn add_window(&self, window: AvailabilityWindow) -> Result<(), EngineError> {
        check_window(&window)?;
        let mut locked = self
            .lock_many(&[(window.instructor_id, ResourceKind::Instructor)])
            .await?;
        let rs = locked
            .resource(window.instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, window.instructor_id))?;
        if rs.windows.len() >= MAX_WINDOWS_PER_INSTRUCTOR {
            return Err(EngineError::LimitExceeded("too many availability windows"));
        }
        if rs.windows.iter().any(|w| w.id == window.id) {
            return Err(EngineError::AlreadyExists(window.id));
        }
        info!(
            "instructor {} available {:?} {}-{}",
            window.instructor_id, window.weekday, window.start, window.end
        );
        self.commit(Event::WindowAdded { window }, &mut locked).await
    }

    /// Replace an existing window. Its instructor cannot change.
    pub async fn update_window(&self, window: AvailabilityWindow) -> Result<(), EngineError> {
        check_window(&window)?;
        let mut locked = self
            .lock_many(&[(window.instructor_id, ResourceKind::Instructor)])
            .await?;
        let rs = locked
            .resource(window.instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, window.instructor_id))?;
        if !rs.windows.iter().any(|w| w.id == window.id) {
            return Err(EngineError::NotFound { kind: "window", id: window.id });
        }
        self.commit(Event::WindowUpdated { window }, &mut locked).await
    }

    pub async fn remove_window(&self, instructor_id: Ulid, window_id: Ulid) -> Result<(), EngineError> {
        let mut locked = self
            .lock_many(&[(instructor_id, ResourceKind::Instructor)])
            .await?;
        let rs = locked
            .resource(instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, instructor_id))?;
        if !rs.windows.iter().any(|w| w.id == window_id) {
            return Err(EngineError::NotFound { kind: "window", id: window_id });
        }
        self.commit(Event::WindowRemoved { id: window_id, instructor_id }, &mut locked)
            .await
    }

    // ── One-off unavailability ───────────────────────────────

    /// Mark the instructor unavailable. Existing sessions in the span are kept.
    pub async fn add_unavailability(
        &self,
        id: Ulid,
        instructor_id: Ulid,
        start: Ms,
        end: Ms,
        reason: Option<String>,
    ) -> Result<UnavailabilityBlock, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!("start {start} must be before end {end}")));
        }
        let span = Span::new(start, end);
        validate_span(&span, MAX_BLOCK_DURATION_MS)?;
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut locked = self
            .lock_many(&[(instructor_id, ResourceKind::Instructor)])
            .await?;
        let rs = locked
            .resource(instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, instructor_id))?;
        if rs.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many intervals on resource"));
        }
        if rs.intervals.iter().any(|i| i.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let block = UnavailabilityBlock { id, instructor_id, span, reason, session_id: None };
        self.commit(Event::BlockAdded { block: block.clone() }, &mut locked).await?;
        Ok(block)
    }

    /// Remove a manual block. Blocks mirroring a session follow the session.
    pub async fn remove_unavailability(&self, instructor_id: Ulid, block_id: Ulid) -> Result<(), EngineError> {
        let mut locked = self
            .lock_many(&[(instructor_id, ResourceKind::Instructor)])
            .await?;
        let rs = locked
            .resource(instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, instructor_id))?;
        let interval = rs
            .intervals
            .iter()
            .find(|i| i.id == block_id)
            .ok_or(EngineError::NotFound { kind: "unavailability block", id: block_id })?;
        match &interval.kind {
            IntervalKind::Unavailable { session_id: None, .. } => {}
            IntervalKind::Unavailable { session_id: Some(session_id), .. } => {
                return Err(EngineError::Validation(format!(
                    "block {block_id} belongs to session {session_id}; change the session instead"
                )));
            }
            IntervalKind::Booking => {
                return Err(EngineError::NotFound { kind: "unavailability block", id: block_id });
            }
        }
        self.commit(Event::BlockRemoved { id: block_id, instructor_id }, &mut locked)
            .await
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as a single snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no commit is in flight, and none starts until we're done.
        let _gate = self.exclusive_gate().await;

        let mut resources = Vec::with_capacity(self.store.resource_count());
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.get_resource(&id) {
                resources.push(rs.read().await.clone());
            }
        }
        let snapshot = self.store.snapshot(resources);
        let events = vec![Event::Snapshot(Box::new(snapshot))];

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| {
                warn!("WAL compaction failed: {e}");
                EngineError::Wal(e.to_string())
            })?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
