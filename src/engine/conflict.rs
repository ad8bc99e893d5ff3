use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, ResourceGuards};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

pub(crate) fn validate_span(span: &Span, max_duration: Ms) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation(format!(
            "start {} must be before end {}",
            span.start, span.end
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_duration {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First live booking on `rs` overlapping `span`, ignoring the `exclude` session.
///
/// Only non-terminal sessions are kept on a resource's calendar, so terminal
/// sessions never conflict.
pub fn find_conflict<'a>(rs: &'a ResourceState, span: &Span, exclude: Option<Ulid>) -> Option<&'a Interval> {
    rs.overlapping(span)
        .find(|i| i.is_booking() && Some(i.id) != exclude)
}

/// First manual unavailability block overlapping `span`.
pub(crate) fn find_manual_block<'a>(rs: &'a ResourceState, span: &Span) -> Option<&'a Interval> {
    rs.overlapping(span).find(|i| i.is_manual_block())
}

impl Engine {
    /// Whether `[start, end)` collides with a live session on the resource.
    pub async fn has_conflict(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        exclude_session: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!("start {start} must be before end {end}")));
        }
        let span = Span::new(start, end);
        let locked = self.read_many(&[(resource_id, kind)]).await?;
        let rs = locked
            .resource(resource_id)
            .ok_or_else(|| EngineError::not_found(kind, resource_id))?;
        Ok(find_conflict(rs, &span, exclude_session).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000;

    fn student_with(bookings: &[(Ulid, Ms, Ms)]) -> ResourceState {
        let mut rs = ResourceState::new(Ulid::new(), ResourceKind::Student, None, None);
        for (id, start, end) in bookings {
            rs.insert_interval(Interval {
                id: *id,
                span: Span::new(*start, *end),
                kind: IntervalKind::Booking,
            });
        }
        rs
    }

    #[test]
    fn conflict_detection_is_symmetric() {
        let a = Span::new(10 * M, 20 * M);
        let b = Span::new(15 * M, 25 * M);
        let rs_a = student_with(&[(Ulid::new(), a.start, a.end)]);
        let rs_b = student_with(&[(Ulid::new(), b.start, b.end)]);
        assert!(find_conflict(&rs_a, &b, None).is_some());
        assert!(find_conflict(&rs_b, &a, None).is_some());
    }

    #[test]
    fn touching_endpoints_never_conflict() {
        let rs = student_with(&[(Ulid::new(), 9 * 60 * M, 10 * 60 * M)]);
        assert!(find_conflict(&rs, &Span::new(10 * 60 * M, 11 * 60 * M), None).is_none());
        assert!(find_conflict(&rs, &Span::new(8 * 60 * M, 9 * 60 * M), None).is_none());
    }

    #[test]
    fn containment_conflicts_both_ways() {
        let rs = student_with(&[(Ulid::new(), 10 * M, 100 * M)]);
        assert!(find_conflict(&rs, &Span::new(20 * M, 30 * M), None).is_some());
        let rs = student_with(&[(Ulid::new(), 20 * M, 30 * M)]);
        assert!(find_conflict(&rs, &Span::new(10 * M, 100 * M), None).is_some());
    }

    #[test]
    fn excluded_session_is_ignored() {
        let id = Ulid::new();
        let rs = student_with(&[(id, 10 * M, 20 * M)]);
        assert!(find_conflict(&rs, &Span::new(10 * M, 20 * M), Some(id)).is_none());
        assert!(find_conflict(&rs, &Span::new(10 * M, 20 * M), Some(Ulid::new())).is_some());
    }

    #[test]
    fn blocks_are_not_bookings() {
        let mut rs = ResourceState::new(Ulid::new(), ResourceKind::Instructor, None, None);
        rs.insert_interval(Interval {
            id: Ulid::new(),
            span: Span::new(0, 10 * M),
            kind: IntervalKind::Unavailable { reason: None, session_id: None },
        });
        let query = Span::new(M, 2 * M);
        assert!(find_conflict(&rs, &query, None).is_none());
        assert!(find_manual_block(&rs, &query).is_some());
    }

    #[test]
    fn validate_span_limits() {
        let base = MIN_VALID_TIMESTAMP_MS;
        assert!(validate_span(&Span { start: base + M, end: base }, DAY_MS).is_err());
        assert!(matches!(
            validate_span(&Span::new(0, M), DAY_MS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(base, base + 2 * DAY_MS), DAY_MS),
            Err(EngineError::LimitExceeded("span too wide"))
        ));
        assert!(validate_span(&Span::new(base, base + HOUR_MS), DAY_MS).is_ok());
    }
}
