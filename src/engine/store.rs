use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, TryLockError};
use ulid::Ulid;

use crate::model::*;

use super::SharedResourceState;

pub(crate) const MIRROR_BLOCK_REASON: &str = "Scheduled session";

/// Access to resources whose locks the caller holds.
pub trait ResourceGuards {
    fn resource(&self, id: Ulid) -> Option<&ResourceState>;
}

/// Write guards on a set of resources, acquired in ascending id order.
pub struct Locked {
    _gate: Option<OwnedRwLockReadGuard<()>>,
    guards: Vec<(Ulid, OwnedRwLockWriteGuard<ResourceState>)>,
}

impl Locked {
    pub(super) fn new(
        gate: Option<OwnedRwLockReadGuard<()>>,
        guards: Vec<(Ulid, OwnedRwLockWriteGuard<ResourceState>)>,
    ) -> Self {
        Self { _gate: gate, guards }
    }

    /// Lock without waiting. Only valid while nothing else can hold the locks (replay).
    pub(super) fn try_acquire(store: &Store, mut ids: Vec<Ulid>) -> Result<Self, TryLockError> {
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rs) = store.get_resource(&id) {
                guards.push((id, rs.try_write_owned()?));
            }
        }
        Ok(Self::new(None, guards))
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut ResourceState> {
        let pos = self.guards.binary_search_by_key(&id, |(k, _)| *k).ok()?;
        Some(&mut *self.guards[pos].1)
    }
}

impl ResourceGuards for Locked {
    fn resource(&self, id: Ulid) -> Option<&ResourceState> {
        let pos = self.guards.binary_search_by_key(&id, |(k, _)| *k).ok()?;
        Some(&*self.guards[pos].1)
    }
}

/// Read guards on a set of resources, acquired in ascending id order.
pub struct ReadLocked {
    guards: Vec<(Ulid, OwnedRwLockReadGuard<ResourceState>)>,
}

impl ReadLocked {
    pub(super) fn new(guards: Vec<(Ulid, OwnedRwLockReadGuard<ResourceState>)>) -> Self {
        Self { guards }
    }
}

impl ResourceGuards for ReadLocked {
    fn resource(&self, id: Ulid) -> Option<&ResourceState> {
        let pos = self.guards.binary_search_by_key(&id, |(k, _)| *k).ok()?;
        Some(&*self.guards[pos].1)
    }
}

/// In-memory tenant tables. Resource state sits behind per-resource locks;
/// session-level tables are only mutated by [`Store::apply`] while the
/// session's resources are write-locked.
#[derive(Default)]
pub struct Store {
    resources: DashMap<Ulid, SharedResourceState>,
    pub(super) subjects: DashMap<Ulid, Subject>,
    pub(super) sessions: DashMap<Ulid, Session>,
    pub(super) series: DashMap<Ulid, Series>,
    pub(super) attendance: DashMap<Ulid, AttendanceRecord>,
}

impl Store {
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.resources.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn get_session(&self, id: &Ulid) -> Option<Session> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    /// Resources an event touches. Used to lock during replay.
    pub fn involved_resources(&self, event: &Event) -> Vec<Ulid> {
        match event {
            Event::ResourceRegistered { .. } | Event::SubjectRegistered { .. } | Event::Snapshot(_) => {
                Vec::new()
            }
            Event::WindowAdded { window } | Event::WindowUpdated { window } => vec![window.instructor_id],
            Event::WindowRemoved { instructor_id, .. } | Event::BlockRemoved { instructor_id, .. } => {
                vec![*instructor_id]
            }
            Event::BlockAdded { block } => vec![block.instructor_id],
            Event::LotPurchased { lot } => vec![lot.student_id],
            Event::MinutesConsumed { student_id, .. } => vec![*student_id],
            Event::SessionBooked { session } => session.resource_ids(),
            Event::SeriesCreated { sessions, .. } => sessions.iter().flat_map(Session::resource_ids).collect(),
            Event::SessionStatusChanged { session_id, .. }
            | Event::SessionRescheduled { session_id, .. }
            | Event::SessionDeleted { session_id } => self.session_resources(session_id),
            Event::AttendanceRecorded { record, .. } => self.session_resources(&record.session_id),
            Event::SeriesStatusChanged { session_ids, .. } | Event::SeriesDeleted { session_ids, .. } => {
                session_ids.iter().flat_map(|id| self.session_resources(id)).collect()
            }
        }
    }

    fn session_resources(&self, session_id: &Ulid) -> Vec<Ulid> {
        self.sessions
            .get(session_id)
            .map(|s| s.resource_ids())
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. The caller holds write locks on every
    /// resource in [`Store::involved_resources`].
    pub fn apply(&self, event: &Event, locked: &mut Locked) {
        match event {
            Event::ResourceRegistered { id, kind, name, rate_cents } => {
                self.resources.entry(*id).or_insert_with(|| {
                    Arc::new(RwLock::new(ResourceState::new(*id, *kind, name.clone(), *rate_cents)))
                });
            }
            Event::SubjectRegistered { subject } => {
                self.subjects.insert(subject.id, subject.clone());
            }
            Event::WindowAdded { window } => {
                if let Some(rs) = locked.get_mut(window.instructor_id) {
                    rs.windows.push(window.clone());
                }
            }
            Event::WindowUpdated { window } => {
                if let Some(rs) = locked.get_mut(window.instructor_id)
                    && let Some(existing) = rs.windows.iter_mut().find(|w| w.id == window.id)
                {
                    *existing = window.clone();
                }
            }
            Event::WindowRemoved { id, instructor_id } => {
                if let Some(rs) = locked.get_mut(*instructor_id) {
                    rs.windows.retain(|w| w.id != *id);
                }
            }
            Event::BlockAdded { block } => {
                if let Some(rs) = locked.get_mut(block.instructor_id) {
                    rs.insert_interval(Interval {
                        id: block.id,
                        span: block.span,
                        kind: IntervalKind::Unavailable {
                            reason: block.reason.clone(),
                            session_id: block.session_id,
                        },
                    });
                }
            }
            Event::BlockRemoved { id, instructor_id } => {
                if let Some(rs) = locked.get_mut(*instructor_id) {
                    rs.remove_interval(*id);
                }
            }
            Event::LotPurchased { lot } => {
                if let Some(rs) = locked.get_mut(lot.student_id) {
                    rs.lots.push(lot.clone());
                }
            }
            Event::MinutesConsumed { deductions, .. } => apply_deductions(deductions, locked),
            Event::SessionBooked { session } => self.book(session.clone(), locked),
            Event::SeriesCreated { series, sessions } => {
                self.series.insert(series.id, series.clone());
                for session in sessions {
                    self.book(session.clone(), locked);
                }
            }
            Event::SessionStatusChanged { session_id, status, reason } => {
                self.set_status(*session_id, *status, reason.clone(), locked);
            }
            Event::SessionRescheduled { session_id, time, mirror_block_id } => {
                if let Some(mut session) = self.sessions.get_mut(session_id) {
                    release(&session, locked);
                    session.time = *time;
                    session.status = SessionStatus::Rescheduled;
                    session.mirror_block_id = Some(*mirror_block_id);
                    occupy(&session, locked);
                }
            }
            Event::SeriesStatusChanged { series_id, status, reason, session_ids } => {
                for id in session_ids {
                    self.set_status(*id, *status, reason.clone(), locked);
                }
                if let Some(mut series) = self.series.get_mut(series_id) {
                    series.status = *status;
                }
            }
            Event::AttendanceRecorded { record, status, reason, deductions } => {
                apply_deductions(deductions, locked);
                self.attendance.insert(record.session_id, record.clone());
                self.set_status(record.session_id, *status, reason.clone(), locked);
            }
            Event::SessionDeleted { session_id } => self.delete_session(session_id, locked),
            Event::SeriesDeleted { series_id, session_ids } => {
                for id in session_ids {
                    self.delete_session(id, locked);
                }
                self.series.remove(series_id);
            }
            Event::Snapshot(snapshot) => self.restore(snapshot),
        }
    }

    fn book(&self, session: Session, locked: &mut Locked) {
        if !session.status.is_terminal() {
            occupy(&session, locked);
        }
        self.sessions.insert(session.id, session);
    }

    fn set_status(&self, session_id: Ulid, status: SessionStatus, reason: Option<String>, locked: &mut Locked) {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if status.is_terminal() && !session.status.is_terminal() {
            release(&session, locked);
            session.mirror_block_id = None;
        }
        session.status = status;
        if reason.is_some() {
            session.cancellation_reason = reason;
        }
    }

    fn delete_session(&self, session_id: &Ulid, locked: &mut Locked) {
        if let Some((_, session)) = self.sessions.remove(session_id)
            && !session.status.is_terminal()
        {
            release(&session, locked);
        }
        self.attendance.remove(session_id);
    }

    fn restore(&self, snapshot: &Snapshot) {
        self.resources.clear();
        self.subjects.clear();
        self.sessions.clear();
        self.series.clear();
        self.attendance.clear();
        for rs in &snapshot.resources {
            self.resources.insert(rs.id, Arc::new(RwLock::new(rs.clone())));
        }
        for subject in &snapshot.subjects {
            self.subjects.insert(subject.id, subject.clone());
        }
        for session in &snapshot.sessions {
            self.sessions.insert(session.id, session.clone());
        }
        for series in &snapshot.series {
            self.series.insert(series.id, series.clone());
        }
        for record in &snapshot.attendance {
            self.attendance.insert(record.session_id, record.clone());
        }
    }

    /// Copy every table. The caller must hold the commit gate exclusively
    /// and read guards on all resources.
    pub(super) fn snapshot(&self, resources: Vec<ResourceState>) -> Snapshot {
        Snapshot {
            resources,
            subjects: self.subjects.iter().map(|e| e.value().clone()).collect(),
            sessions: self.sessions.iter().map(|e| e.value().clone()).collect(),
            series: self.series.iter().map(|e| e.value().clone()).collect(),
            attendance: self.attendance.iter().map(|e| e.value().clone()).collect(),
        }
    }
}

/// Put a live session on its resources' calendars.
fn occupy(session: &Session, locked: &mut Locked) {
    let span = session.span();
    for rid in session.resource_ids() {
        if let Some(rs) = locked.get_mut(rid) {
            rs.insert_interval(Interval { id: session.id, span, kind: IntervalKind::Booking });
        }
    }
    if let Some(block_id) = session.mirror_block_id
        && let Some(rs) = locked.get_mut(session.instructor_id)
    {
        rs.insert_interval(Interval {
            id: block_id,
            span,
            kind: IntervalKind::Unavailable {
                reason: Some(MIRROR_BLOCK_REASON.to_string()),
                session_id: Some(session.id),
            },
        });
    }
}

fn release(session: &Session, locked: &mut Locked) {
    for rid in session.resource_ids() {
        if let Some(rs) = locked.get_mut(rid) {
            rs.remove_interval(session.id);
        }
    }
    if let Some(block_id) = session.mirror_block_id
        && let Some(rs) = locked.get_mut(session.instructor_id)
    {
        rs.remove_interval(block_id);
    }
}

fn apply_deductions(deductions: &[Deduction], locked: &mut Locked) {
    for d in deductions {
        if let Some(rs) = locked.get_mut(d.student_id) {
            if let Some(lot) = rs.lot_mut(d.lot_id) {
                lot.minutes_remaining = lot.minutes_remaining.saturating_sub(d.minutes);
            }
            rs.deductions.push(d.clone());
        }
    }
}
