use chrono::{Datelike, NaiveDate, NaiveTime};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{evaluate, Participants};
use super::conflict::{now_ms, validate_span};
use super::ledger::{deductions_for, plan_consumption, record_shortfall};
use super::{Engine, EngineError, Locked, ResourceGuards};

pub const NO_SHOW_REASON: &str = "Student did not attend";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub student_id: Ulid,
    pub subject_id: Ulid,
    pub classroom_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
    /// `pending` or `scheduled`.
    pub status: SessionStatus,
    pub location: Option<String>,
}

impl NewSession {
    pub fn new(instructor_id: Ulid, student_id: Ulid, subject_id: Ulid, start: Ms, end: Ms) -> Self {
        Self {
            id: Ulid::new(),
            instructor_id,
            student_id,
            subject_id,
            classroom_id: None,
            start,
            end,
            status: SessionStatus::Scheduled,
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeries {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub student_id: Ulid,
    pub subject_id: Ulid,
    pub classroom_id: Option<Ulid>,
    pub days: DaySet,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub location: Option<String>,
}

/// Result of recording attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendance {
    pub session: Session,
    pub record: AttendanceRecord,
    pub deductions: Vec<Deduction>,
}

fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

fn count_rejection(err: &EngineError) {
    metrics::counter!(crate::observability::BOOKING_REJECTIONS_TOTAL, "kind" => err.kind().as_str())
        .increment(1);
    debug!("booking rejected: {err}");
}

fn check_interval_room(locked: &Locked, ids: &[(Ulid, ResourceKind)], extra: usize) -> Result<(), EngineError> {
    for (id, _) in ids {
        if let Some(rs) = locked.resource(*id)
            && rs.intervals.len() + extra * 2 > MAX_INTERVALS_PER_RESOURCE
        {
            return Err(EngineError::LimitExceeded("too many intervals on resource"));
        }
    }
    Ok(())
}

impl Engine {
    fn require_subject(&self, subject_id: Ulid) -> Result<(), EngineError> {
        if self.store.subjects.contains_key(&subject_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound { kind: "subject", id: subject_id })
        }
    }

    /// Book a single session. Availability is checked and the session, its
    /// bookings and its mirror block are written while the participants stay locked.
    pub async fn create_session(&self, req: NewSession) -> Result<Session, EngineError> {
        if !matches!(req.status, SessionStatus::Pending | SessionStatus::Scheduled) {
            return Err(EngineError::Validation(format!(
                "a new session must be pending or scheduled, not {}",
                req.status
            )));
        }
        if req.instructor_id == req.student_id {
            return Err(EngineError::Validation("instructor and student must differ".into()));
        }
        if req.start >= req.end {
            return Err(EngineError::Validation(format!(
                "start {} must be before end {}",
                req.start, req.end
            )));
        }
        let span = Span::new(req.start, req.end);
        validate_span(&span, MAX_SESSION_DURATION_MS)?;
        check_text(req.location.as_deref(), MAX_NAME_LEN, "location too long")?;
        self.require_subject(req.subject_id)?;
        if self.store.sessions.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let mut participants = vec![
            (req.instructor_id, ResourceKind::Instructor),
            (req.student_id, ResourceKind::Student),
        ];
        participants.extend(req.classroom_id.map(|c| (c, ResourceKind::Classroom)));
        let mut locked = self.lock_many(&participants).await?;
        if self.store.sessions.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        check_interval_room(&locked, &participants, 1)?;

        let p = Participants::resolve(&locked, req.instructor_id, Some(req.student_id), req.classroom_id)?;
        let time = evaluate(self.normalizer(), &p, span, None)?
            .into_result()
            .inspect_err(count_rejection)?;

        let session = Session {
            id: req.id,
            instructor_id: req.instructor_id,
            student_id: req.student_id,
            subject_id: req.subject_id,
            classroom_id: req.classroom_id,
            series_id: None,
            time,
            status: req.status,
            location: req.location,
            cancellation_reason: None,
            mirror_block_id: Some(Ulid::new()),
        };
        self.commit(Event::SessionBooked { session: session.clone() }, &mut locked).await?;
        metrics::counter!(crate::observability::SESSIONS_BOOKED_TOTAL).increment(1);
        info!(
            "booked session {} for instructor {} on {} {}-{}",
            session.id,
            session.instructor_id,
            time.local().date,
            time.local().start,
            time.local().end
        );
        Ok(session)
    }

    /// Create a weekly series: one pending session per matching date in the
    /// range. Every occurrence must be bookable or nothing is written.
    pub async fn create_series(&self, req: NewSeries) -> Result<(Series, Vec<Session>), EngineError> {
        if req.days.is_empty() {
            return Err(EngineError::Validation("series needs at least one weekday".into()));
        }
        if req.start >= req.end {
            return Err(EngineError::Validation(format!(
                "start {} must be before end {}",
                req.start, req.end
            )));
        }
        if req.first_date > req.last_date {
            return Err(EngineError::Validation(format!(
                "series starts {} after it ends {}",
                req.first_date, req.last_date
            )));
        }
        if req.instructor_id == req.student_id {
            return Err(EngineError::Validation("instructor and student must differ".into()));
        }
        check_text(req.location.as_deref(), MAX_NAME_LEN, "location too long")?;
        self.require_subject(req.subject_id)?;
        if self.store.series.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let dates: Vec<NaiveDate> = req
            .first_date
            .iter_days()
            .take_while(|d| *d <= req.last_date)
            .filter(|d| req.days.contains(d.weekday()))
            .take(MAX_SERIES_OCCURRENCES + 1)
            .collect();
        if dates.len() > MAX_SERIES_OCCURRENCES {
            return Err(EngineError::LimitExceeded("too many series occurrences"));
        }
        if dates.is_empty() {
            return Err(EngineError::Validation("series has no occurrences in its date range".into()));
        }

        let mut participants = vec![
            (req.instructor_id, ResourceKind::Instructor),
            (req.student_id, ResourceKind::Student),
        ];
        participants.extend(req.classroom_id.map(|c| (c, ResourceKind::Classroom)));
        let mut locked = self.lock_many(&participants).await?;
        if self.store.series.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        check_interval_room(&locked, &participants, dates.len())?;

        let tn = self.normalizer();
        let p = Participants::resolve(&locked, req.instructor_id, Some(req.student_id), req.classroom_id)?;
        let mut sessions = Vec::with_capacity(dates.len());
        for date in &dates {
            let span = tn.span_for(*date, req.start, req.end)?;
            validate_span(&span, MAX_SESSION_DURATION_MS)?;
            let time = evaluate(tn, &p, span, None)?
                .into_result()
                .inspect_err(count_rejection)?;
            sessions.push(Session {
                id: Ulid::new(),
                instructor_id: req.instructor_id,
                student_id: req.student_id,
                subject_id: req.subject_id,
                classroom_id: req.classroom_id,
                series_id: Some(req.id),
                time,
                status: SessionStatus::Pending,
                location: req.location.clone(),
                cancellation_reason: None,
                mirror_block_id: Some(Ulid::new()),
            });
        }

        let series = Series {
            id: req.id,
            instructor_id: req.instructor_id,
            student_id: req.student_id,
            subject_id: req.subject_id,
            classroom_id: req.classroom_id,
            days: req.days,
            start: req.start,
            end: req.end,
            first_date: req.first_date,
            last_date: req.last_date,
            status: SessionStatus::Pending,
            session_count: sessions.len() as u32,
            location: req.location,
        };
        self.commit(
            Event::SeriesCreated { series: series.clone(), sessions: sessions.clone() },
            &mut locked,
        )
        .await?;
        metrics::counter!(crate::observability::SESSIONS_BOOKED_TOTAL).increment(sessions.len() as u64);
        info!("created series {} with {} sessions ({})", series.id, sessions.len(), series.days);
        Ok((series, sessions))
    }

    /// Move a session along its lifecycle. Leaving the live states releases
    /// its bookings and mirror block in the same commit.
    pub async fn set_session_status(
        &self,
        session_id: Ulid,
        status: SessionStatus,
        reason: Option<String>,
    ) -> Result<Session, EngineError> {
        match status {
            SessionStatus::Completed => {
                return Err(EngineError::Validation(
                    "sessions are completed by recording attendance".into(),
                ));
            }
            SessionStatus::Rescheduled => {
                return Err(EngineError::Validation(
                    "sessions are rescheduled by giving a new time".into(),
                ));
            }
            _ => {}
        }
        check_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;

        let (mut locked, session) = self.lock_session(session_id).await?;
        if session.status == status && status.is_terminal() {
            return Ok(session);
        }
        if !session.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from: session.status, to: status });
        }

        self.commit(Event::SessionStatusChanged { session_id, status, reason }, &mut locked)
            .await?;
        info!("session {session_id}: {} -> {status}", session.status);
        self.store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })
    }

    /// Move a live session to a new time. The session is ignored when
    /// checking its own resources.
    pub async fn reschedule_session(&self, session_id: Ulid, start: Ms, end: Ms) -> Result<Session, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!("start {start} must be before end {end}")));
        }
        let span = Span::new(start, end);
        validate_span(&span, MAX_SESSION_DURATION_MS)?;

        let (mut locked, session) = self.lock_session(session_id).await?;
        if !session.status.can_transition_to(SessionStatus::Rescheduled) {
            return Err(EngineError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Rescheduled,
            });
        }

        let p = Participants::resolve(&locked, session.instructor_id, Some(session.student_id), session.classroom_id)?;
        let time = evaluate(self.normalizer(), &p, span, Some(session_id))?
            .into_result()
            .inspect_err(count_rejection)?;

        self.commit(
            Event::SessionRescheduled { session_id, time, mirror_block_id: Ulid::new() },
            &mut locked,
        )
        .await?;
        info!("rescheduled session {session_id} to {} {}", time.local().date, time.local().start);
        self.store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })
    }

    /// Record whether the student attended. Attendance completes the session
    /// and draws its duration from the student's lots in one commit; absence
    /// cancels it without touching the ledger.
    pub async fn record_attendance(
        &self,
        session_id: Ulid,
        attended: bool,
        note: Option<String>,
    ) -> Result<Attendance, EngineError> {
        check_text(note.as_deref(), MAX_REASON_LEN, "note too long")?;
        let (mut locked, session) = self.lock_session(session_id).await?;
        if self.store.attendance.contains_key(&session_id) {
            return Err(EngineError::AlreadyExists(session_id));
        }
        let target = if attended { SessionStatus::Completed } else { SessionStatus::Canceled };
        if !matches!(session.status, SessionStatus::Scheduled | SessionStatus::Rescheduled) {
            return Err(EngineError::InvalidTransition { from: session.status, to: target });
        }

        let now = now_ms();
        let record = AttendanceRecord {
            session_id,
            student_id: session.student_id,
            attended,
            note,
            recorded_at: now,
        };

        let (deductions, reason) = if attended {
            let student = locked
                .resource(session.student_id)
                .ok_or_else(|| EngineError::not_found(ResourceKind::Student, session.student_id))?;
            let minutes = session.time.duration_minutes();
            // Expiry is judged against the day the lesson took place.
            let plan = plan_consumption(&student.lots, minutes, session.time.local().date)
                .inspect_err(record_shortfall)?;
            (deductions_for(&plan, session_id, session.student_id, now), None)
        } else {
            (Vec::new(), Some(NO_SHOW_REASON.to_string()))
        };

        self.commit(
            Event::AttendanceRecorded {
                record: record.clone(),
                status: target,
                reason,
                deductions: deductions.clone(),
            },
            &mut locked,
        )
        .await?;
        if attended {
            metrics::counter!(crate::observability::MINUTES_CONSUMED_TOTAL)
                .increment(u64::from(session.time.duration_minutes()));
        }
        info!("attendance for session {session_id}: attended={attended}, {} deductions", deductions.len());

        let session = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })?;
        Ok(Attendance { session, record, deductions })
    }

    /// Remove a session outright. Bookings and the mirror block go with it;
    /// deductions already taken stay on the student's ledger.
    pub async fn delete_session(&self, session_id: Ulid) -> Result<(), EngineError> {
        let (mut locked, _) = self.lock_session(session_id).await?;
        self.commit(Event::SessionDeleted { session_id }, &mut locked).await?;
        info!("deleted session {session_id}");
        Ok(())
    }

    fn series_or_not_found(&self, series_id: Ulid) -> Result<Series, EngineError> {
        self.store
            .series
            .get(&series_id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound { kind: "series", id: series_id })
    }

    fn series_session_ids(&self, series_id: Ulid) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .store
            .sessions
            .iter()
            .filter(|e| e.value().series_id == Some(series_id))
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }

    async fn lock_series(&self, series_id: Ulid) -> Result<(Locked, Series), EngineError> {
        let series = self.series_or_not_found(series_id)?;
        let mut participants = vec![
            (series.instructor_id, ResourceKind::Instructor),
            (series.student_id, ResourceKind::Student),
        ];
        participants.extend(series.classroom_id.map(|c| (c, ResourceKind::Classroom)));
        let locked = self.lock_many(&participants).await?;
        let series = self.series_or_not_found(series_id)?;
        Ok((locked, series))
    }

    /// Apply a status to a whole series. Each child session that can make the
    /// transition does; the rest are left as they are.
    pub async fn set_series_status(
        &self,
        series_id: Ulid,
        status: SessionStatus,
        reason: Option<String>,
    ) -> Result<Series, EngineError> {
        if matches!(status, SessionStatus::Completed | SessionStatus::Rescheduled) {
            return Err(EngineError::Validation(format!(
                "a series cannot be moved to {status} as a whole"
            )));
        }
        check_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;

        let (mut locked, series) = self.lock_series(series_id).await?;
        if series.status == status && status.is_terminal() {
            return Ok(series);
        }
        if !series.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from: series.status, to: status });
        }

        let session_ids: Vec<Ulid> = self
            .series_session_ids(series_id)
            .into_iter()
            .filter(|id| {
                self.store
                    .sessions
                    .get(id)
                    .is_some_and(|s| s.status.can_transition_to(status))
            })
            .collect();
        let changed = session_ids.len();
        self.commit(
            Event::SeriesStatusChanged { series_id, status, reason, session_ids },
            &mut locked,
        )
        .await?;
        info!("series {series_id}: {} -> {status} ({changed} sessions)", series.status);
        self.series_or_not_found(series_id)
    }

    /// Delete a series and every session it generated, in one commit.
    pub async fn delete_series(&self, series_id: Ulid) -> Result<usize, EngineError> {
        let (mut locked, _) = self.lock_series(series_id).await?;
        let session_ids = self.series_session_ids(series_id);
        let removed = session_ids.len();
        self.commit(Event::SeriesDeleted { series_id, session_ids }, &mut locked).await?;
        info!("deleted series {series_id} and {removed} sessions");
        Ok(removed)
    }
}
