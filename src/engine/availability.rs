use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_SESSION_DURATION_MS;
use crate::model::*;
use crate::time::TimeNormalizer;

use super::conflict::{find_conflict, find_manual_block, validate_span};
use super::{Engine, EngineError, ResourceGuards};

// ── Requests and reports ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub instructor_id: Ulid,
    pub student_id: Option<Ulid>,
    pub classroom_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
    /// Ignored on every resource, for moving a session onto itself.
    pub exclude_session: Option<Ulid>,
}

impl AvailabilityRequest {
    pub fn new(instructor_id: Ulid, start: Ms, end: Ms) -> Self {
        Self {
            instructor_id,
            student_id: None,
            classroom_id: None,
            start,
            end,
            exclude_session: None,
        }
    }

    pub fn with_student(mut self, student_id: Ulid) -> Self {
        self.student_id = Some(student_id);
        self
    }

    pub fn with_classroom(mut self, classroom_id: Ulid) -> Self {
        self.classroom_id = Some(classroom_id);
        self
    }

    pub fn excluding(mut self, session_id: Ulid) -> Self {
        self.exclude_session = Some(session_id);
        self
    }

    fn participants(&self) -> Vec<(Ulid, ResourceKind)> {
        let mut out = vec![(self.instructor_id, ResourceKind::Instructor)];
        out.extend(self.student_id.map(|s| (s, ResourceKind::Student)));
        out.extend(self.classroom_id.map(|c| (c, ResourceKind::Classroom)));
        out
    }
}

/// Outcome of an availability check, with the data that led to it.
#[derive(Debug)]
pub struct AvailabilityReport {
    pub requested: Span,
    pub time: SessionTime,
    /// Applicable windows that touch the candidate.
    pub matching_windows: Vec<AvailabilityWindow>,
    /// Windows on the same weekday that don't, including inactive or out-of-range ones.
    pub non_matching_windows: Vec<AvailabilityWindow>,
    /// Free spans of the candidate's local day.
    pub free: Vec<Span>,
    pub rejection: Option<EngineError>,
}

impl AvailabilityReport {
    pub fn is_available(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn local(&self) -> LocalSlot {
        self.time.local()
    }

    pub(crate) fn into_result(self) -> Result<SessionTime, EngineError> {
        match self.rejection {
            Some(err) => Err(err),
            None => Ok(self.time),
        }
    }
}

// ── Pure evaluation ──────────────────────────────────────────────

/// The resources a candidate session would occupy.
pub(crate) struct Participants<'a> {
    pub instructor: &'a ResourceState,
    pub student: Option<&'a ResourceState>,
    pub classroom: Option<&'a ResourceState>,
}

impl<'a> Participants<'a> {
    pub fn resolve(
        guards: &'a impl ResourceGuards,
        instructor_id: Ulid,
        student_id: Option<Ulid>,
        classroom_id: Option<Ulid>,
    ) -> Result<Self, EngineError> {
        let get = |id: Ulid, kind: ResourceKind| {
            guards
                .resource(id)
                .ok_or_else(|| EngineError::not_found(kind, id))
        };
        Ok(Self {
            instructor: get(instructor_id, ResourceKind::Instructor)?,
            student: student_id.map(|id| get(id, ResourceKind::Student)).transpose()?,
            classroom: classroom_id.map(|id| get(id, ResourceKind::Classroom)).transpose()?,
        })
    }

    fn all(&self) -> impl Iterator<Item = &'a ResourceState> {
        std::iter::once(self.instructor)
            .chain(self.student)
            .chain(self.classroom)
    }
}

/// Absolute span of a window on `date`. `None` if a boundary falls in a DST gap.
pub(crate) fn window_span(tn: &TimeNormalizer, date: NaiveDate, w: &AvailabilityWindow) -> Option<Span> {
    tn.span_for(date, w.start, w.end).ok()
}

/// A window matches when it contains the candidate, holds either endpoint,
/// or is itself contained by the candidate.
fn window_matches(window: &Span, candidate: &Span) -> bool {
    window.contains_span(candidate)
        || window.contains_instant(candidate.start)
        || (window.start < candidate.end && candidate.end <= window.end)
        || candidate.contains_span(window)
}

/// Free spans of one local day: applicable windows, minus manual blocks and
/// every participant's bookings.
pub(crate) fn free_spans(
    tn: &TimeNormalizer,
    p: &Participants<'_>,
    date: NaiveDate,
    exclude: Option<Ulid>,
) -> Result<Vec<Span>, EngineError> {
    let day = tn.day_span(date)?;
    let weekday = chrono::Datelike::weekday(&date);

    let mut open: Vec<Span> = p
        .instructor
        .windows_on(date, weekday)
        .filter_map(|w| window_span(tn, date, w))
        .collect();
    open.sort_by_key(|s| s.start);
    let open = merge_overlapping(&open);

    let mut busy: Vec<Span> = Vec::new();
    for rs in p.all() {
        for interval in rs.overlapping(&day) {
            let counts = match &interval.kind {
                IntervalKind::Booking => Some(interval.id) != exclude,
                IntervalKind::Unavailable { session_id, .. } => session_id.is_none() || *session_id != exclude,
            };
            if counts {
                busy.push(interval.span);
            }
        }
    }
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    Ok(subtract_intervals(&open, &busy))
}

/// Decide whether `span` is a legal session for the participants.
///
/// Rejections are reported in order: outside availability, manual
/// unavailability, then conflicts on instructor, student and classroom.
pub(crate) fn evaluate(
    tn: &TimeNormalizer,
    p: &Participants<'_>,
    span: Span,
    exclude: Option<Ulid>,
) -> Result<AvailabilityReport, EngineError> {
    let time = tn.session_time(span)?;
    let local = time.local();

    let mut matching_windows = Vec::new();
    let mut non_matching_windows = Vec::new();
    let mut covering: Vec<Span> = Vec::new();
    for w in p.instructor.windows.iter().filter(|w| w.weekday == local.weekday) {
        let matched = w.applies_on(local.date, local.weekday)
            && window_span(tn, local.date, w).is_some_and(|ws| {
                let hit = window_matches(&ws, &span);
                if hit {
                    covering.push(ws);
                }
                hit
            });
        if matched {
            matching_windows.push(w.clone());
        } else {
            non_matching_windows.push(w.clone());
        }
    }
    covering.sort_by_key(|s| s.start);
    let covering = merge_overlapping(&covering);

    let free = free_spans(tn, p, local.date, exclude)?;

    let rejection = if !subtract_intervals(&[span], &covering).is_empty() {
        Some(EngineError::OutsideAvailability {
            requested: span,
            available: free.clone(),
        })
    } else if let Some(block) = find_manual_block(p.instructor, &span) {
        let reason = match &block.kind {
            IntervalKind::Unavailable { reason, .. } => reason.clone(),
            IntervalKind::Booking => None,
        };
        Some(EngineError::InstructorUnavailable {
            block_id: block.id,
            span: block.span,
            reason,
            available: free.clone(),
        })
    } else {
        p.all().find_map(|rs| {
            find_conflict(rs, &span, exclude).map(|hit| EngineError::ResourceConflict {
                kind: rs.kind,
                resource_id: rs.id,
                session_id: hit.id,
                span,
                available: free.clone(),
            })
        })
    };

    Ok(AvailabilityReport {
        requested: span,
        time,
        matching_windows,
        non_matching_windows,
        free,
        rejection,
    })
}

impl Engine {
    /// Full availability check with diagnostics. A rejected candidate is
    /// reported in `rejection`; `Err` means the request itself was unusable.
    pub async fn check_availability(&self, req: &AvailabilityRequest) -> Result<AvailabilityReport, EngineError> {
        if req.start >= req.end {
            return Err(EngineError::Validation(format!(
                "start {} must be before end {}",
                req.start, req.end
            )));
        }
        let span = Span::new(req.start, req.end);
        validate_span(&span, MAX_SESSION_DURATION_MS)?;
        let locked = self.read_many(&req.participants()).await?;
        let p = Participants::resolve(&locked, req.instructor_id, req.student_id, req.classroom_id)?;
        evaluate(self.normalizer(), &p, span, req.exclude_session)
    }

    pub async fn is_available(&self, instructor_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let report = self
            .check_availability(&AvailabilityRequest::new(instructor_id, start, end))
            .await?;
        Ok(report.is_available())
    }

    /// Bookable spans of an instructor on a local date.
    pub async fn free_spans(&self, instructor_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let locked = self.read_many(&[(instructor_id, ResourceKind::Instructor)]).await?;
        let p = Participants::resolve(&locked, instructor_id, None, None)?;
        free_spans(self.normalizer(), &p, date, None)
    }
}

// ── Interval algebra ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` from `base`. Both must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
