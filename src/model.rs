use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, always UTC.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.duration_ms() / crate::limits::MINUTE_MS) as u32
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Days ─────────────────────────────────────────────────────────

/// A set of weekdays, used for series recurrence and slot preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DaySet(u8);

impl DaySet {
    pub const MONDAY: Self = DaySet(1 << 0);
    pub const TUESDAY: Self = DaySet(1 << 1);
    pub const WEDNESDAY: Self = DaySet(1 << 2);
    pub const THURSDAY: Self = DaySet(1 << 3);
    pub const FRIDAY: Self = DaySet(1 << 4);
    pub const SATURDAY: Self = DaySet(1 << 5);
    pub const SUNDAY: Self = DaySet(1 << 6);

    pub const WEEKDAYS: Self = DaySet(0b0011111);
    pub const ALL: Self = DaySet(0b1111111);
    pub const NONE: Self = DaySet(0);

    const NAMES: [(Weekday, &'static str); 7] = [
        (Weekday::Mon, "mon"),
        (Weekday::Tue, "tue"),
        (Weekday::Wed, "wed"),
        (Weekday::Thu, "thu"),
        (Weekday::Fri, "fri"),
        (Weekday::Sat, "sat"),
        (Weekday::Sun, "sun"),
    ];

    pub fn of(day: Weekday) -> Self {
        DaySet(1 << day.num_days_from_monday())
    }

    pub fn contains(self, day: Weekday) -> bool {
        (self & Self::of(day)) != Self::NONE
    }

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }

    pub fn insert(&mut self, day: Weekday) {
        *self |= Self::of(day);
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        Self::NAMES
            .into_iter()
            .map(|(d, _)| d)
            .filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::NONE;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// Parses comma-separated day names, e.g. `"mon,wed,fri"` or `"Monday,Friday"`.
impl FromStr for DaySet {
    type Err = String;

    fn from_str(days: &str) -> Result<Self, Self::Err> {
        let mut result = Self::NONE;
        for token in days.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            // chrono takes the short or full English name, in any case, and nothing else.
            let day = token.parse::<Weekday>().map_err(|_| format!("unknown day: {token}"))?;
            result.insert(day);
        }
        Ok(result)
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(d, _)| self.contains(*d))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

impl BitOr for DaySet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        DaySet(self.0 | rhs.0)
    }
}

impl BitAnd for DaySet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        DaySet(self.0 & rhs.0)
    }
}

impl BitOrAssign for DaySet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Instructor,
    Student,
    Classroom,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Instructor => "instructor",
            ResourceKind::Student => "student",
            ResourceKind::Classroom => "classroom",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an absolute interval on a resource represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Instructor exception. `session_id` is set on blocks mirroring a session.
    Unavailable {
        reason: Option<String>,
        session_id: Option<Ulid>,
    },
    /// A non-terminal session occupying the resource. The interval id is the session id.
    Booking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_booking(&self) -> bool {
        matches!(self.kind, IntervalKind::Booking)
    }

    pub fn is_manual_block(&self) -> bool {
        matches!(self.kind, IntervalKind::Unavailable { session_id: None, .. })
    }
}

/// Recurring weekly availability of an instructor, in tenant-local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub active: bool,
    /// Inclusive.
    pub valid_from: Option<NaiveDate>,
    /// Inclusive.
    pub valid_until: Option<NaiveDate>,
    pub category: Option<String>,
}

impl AvailabilityWindow {
    /// Whether the window is in force on `date`.
    pub fn applies_on(&self, date: NaiveDate, weekday: Weekday) -> bool {
        self.active
            && self.weekday == weekday
            && self.valid_from.is_none_or(|from| from <= date)
            && self.valid_until.is_none_or(|until| date <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityBlock {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
    pub session_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLot {
    pub id: Ulid,
    pub student_id: Ulid,
    pub package_id: Ulid,
    pub minutes_remaining: u32,
    /// Last day (tenant-local) on which the lot can be drawn from.
    pub expires_on: NaiveDate,
    pub purchased_at: Ms,
}

impl TimeLot {
    pub fn usable_on(&self, date: NaiveDate) -> bool {
        self.minutes_remaining > 0 && date <= self.expires_on
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub id: Ulid,
    pub session_id: Ulid,
    pub student_id: Ulid,
    pub lot_id: Ulid,
    pub minutes: u32,
    pub at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub name: Option<String>,
    /// Display metadata for instructors, in cents per hour.
    pub rate_cents: Option<u32>,
    pub windows: Vec<AvailabilityWindow>,
    /// Unavailability blocks and bookings, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Student lots, in purchase order.
    pub lots: Vec<TimeLot>,
    /// Append-only.
    pub deductions: Vec<Deduction>,
}

impl ResourceState {
    pub fn new(id: Ulid, kind: ResourceKind, name: Option<String>, rate_cents: Option<u32>) -> Self {
        Self {
            id,
            kind,
            name,
            rate_cents,
            windows: Vec::new(),
            intervals: Vec::new(),
            lots: Vec::new(),
            deductions: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn windows_on(&self, date: NaiveDate, weekday: Weekday) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows.iter().filter(move |w| w.applies_on(date, weekday))
    }

    pub fn blocks(&self, instructor_id: Ulid) -> Vec<UnavailabilityBlock> {
        self.intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Unavailable { reason, session_id } => Some(UnavailabilityBlock {
                    id: i.id,
                    instructor_id,
                    span: i.span,
                    reason: reason.clone(),
                    session_id: *session_id,
                }),
                IntervalKind::Booking => None,
            })
            .collect()
    }

    pub fn lot_mut(&mut self, lot_id: Ulid) -> Option<&mut TimeLot> {
        self.lots.iter_mut().find(|l| l.id == lot_id)
    }
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Scheduled,
    Rescheduled,
    Completed,
    Canceled,
    Declined,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Canceled | SessionStatus::Declined
        )
    }

    /// Edges of the lifecycle graph. Re-entering `rescheduled` is a move.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled | Canceled | Declined)
                | (Scheduled | Rescheduled, Completed | Canceled | Rescheduled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Rescheduled => "rescheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Canceled => "canceled",
            SessionStatus::Declined => "declined",
        })
    }
}

/// Tenant-local projection of a session's span: the legacy date/time columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSlot {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A session's time, canonical span plus its derived local projection.
///
/// Only [`crate::time::TimeNormalizer::session_time`] builds one, so the two
/// representations cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTime {
    span: Span,
    local: LocalSlot,
}

impl SessionTime {
    pub(crate) fn derived(span: Span, local: LocalSlot) -> Self {
        Self { span, local }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn local(&self) -> LocalSlot {
        self.local
    }

    pub fn duration_minutes(&self) -> u32 {
        self.span.duration_minutes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub student_id: Ulid,
    pub subject_id: Ulid,
    pub classroom_id: Option<Ulid>,
    pub series_id: Option<Ulid>,
    pub time: SessionTime,
    pub status: SessionStatus,
    pub location: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Present while the session is non-terminal.
    pub mirror_block_id: Option<Ulid>,
}

impl Session {
    pub fn span(&self) -> Span {
        self.time.span()
    }

    /// Every resource whose calendar this session occupies.
    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids = vec![self.instructor_id, self.student_id];
        ids.extend(self.classroom_id);
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
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
    pub status: SessionStatus,
    pub session_count: u32,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: Ulid,
    pub student_id: Ulid,
    pub attended: bool,
    pub note: Option<String>,
    pub recorded_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Ulid,
    pub name: String,
}

// ── WAL records ──────────────────────────────────────────────────

/// Full tenant state, written by compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub resources: Vec<ResourceState>,
    pub subjects: Vec<Subject>,
    pub sessions: Vec<Session>,
    pub series: Vec<Series>,
    pub attendance: Vec<AttendanceRecord>,
}

/// The event types. This is the WAL record format; one event is one atomic commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        kind: ResourceKind,
        name: Option<String>,
        rate_cents: Option<u32>,
    },
    SubjectRegistered {
        subject: Subject,
    },
    WindowAdded {
        window: AvailabilityWindow,
    },
    WindowUpdated {
        window: AvailabilityWindow,
    },
    WindowRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    BlockAdded {
        block: UnavailabilityBlock,
    },
    BlockRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    LotPurchased {
        lot: TimeLot,
    },
    SessionBooked {
        session: Session,
    },
    SeriesCreated {
        series: Series,
        sessions: Vec<Session>,
    },
    SessionStatusChanged {
        session_id: Ulid,
        status: SessionStatus,
        reason: Option<String>,
    },
    SessionRescheduled {
        session_id: Ulid,
        time: SessionTime,
        mirror_block_id: Ulid,
    },
    SeriesStatusChanged {
        series_id: Ulid,
        status: SessionStatus,
        reason: Option<String>,
        session_ids: Vec<Ulid>,
    },
    AttendanceRecorded {
        record: AttendanceRecord,
        status: SessionStatus,
        reason: Option<String>,
        deductions: Vec<Deduction>,
    },
    MinutesConsumed {
        student_id: Ulid,
        deductions: Vec<Deduction>,
    },
    SessionDeleted {
        session_id: Ulid,
    },
    SeriesDeleted {
        series_id: Ulid,
        session_ids: Vec<Ulid>,
    },
    Snapshot(Box<Snapshot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms) -> Interval {
        Interval {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: IntervalKind::Booking,
        }
    }

    fn block(start: Ms, end: Ms) -> Interval {
        Interval {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: IntervalKind::Unavailable { reason: None, session_id: None },
        }
    }

    fn instructor() -> ResourceState {
        ResourceState::new(Ulid::new(), ResourceKind::Instructor, None, None)
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
        assert_eq!(Span::new(0, 90 * 60_000).duration_minutes(), 90);
    }

    #[test]
    fn span_overlap_is_symmetric_and_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn interval_ordering() {
        let mut rs = instructor();
        rs.insert_interval(booking(300, 400));
        rs.insert_interval(block(100, 200));
        rs.insert_interval(booking(200, 300));
        let starts: Vec<Ms> = rs.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut rs = instructor();
        let items: Vec<Interval> = (0..3).map(|i| booking(i * 100, i * 100 + 50)).collect();
        let ids: Vec<Ulid> = items.iter().map(|i| i.id).collect();
        for i in items {
            rs.insert_interval(i);
        }
        assert!(rs.remove_interval(ids[1]).is_some());
        assert!(rs.remove_interval(Ulid::new()).is_none());
        assert_eq!(rs.intervals.len(), 2);
        assert_eq!(rs.intervals[0].id, ids[0]);
        assert_eq!(rs.intervals[1].id, ids[2]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = instructor();
        rs.insert_interval(booking(100, 200));
        rs.insert_interval(block(450, 600));
        rs.insert_interval(booking(1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = instructor();
        rs.insert_interval(booking(100, 200));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn overlapping_large_interval_spanning_query() {
        let mut rs = instructor();
        rs.insert_interval(block(0, 10_000));
        assert_eq!(rs.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn interval_kind_helpers() {
        assert!(booking(0, 1).is_booking());
        assert!(block(0, 1).is_manual_block());
        let mirror = Interval {
            id: Ulid::new(),
            span: Span::new(0, 1),
            kind: IntervalKind::Unavailable { reason: None, session_id: Some(Ulid::new()) },
        };
        assert!(!mirror.is_manual_block());
        assert!(!mirror.is_booking());
    }

    #[test]
    fn day_set_parse_and_display() {
        let days: DaySet = "mon, wed,fri".parse().unwrap();
        assert!(days.contains(Weekday::Mon));
        assert!(!days.contains(Weekday::Tue));
        assert!(days.contains(Weekday::Wed));
        assert!(days.contains(Weekday::Fri));
        assert_eq!(days.to_string(), "mon,wed,fri");
        assert_eq!("Monday,Tuesday".parse::<DaySet>().unwrap(), DaySet::MONDAY | DaySet::TUESDAY);
        assert!("funday".parse::<DaySet>().is_err());
        assert!("monkey".parse::<DaySet>().is_err());
        assert!("mon,sunny".parse::<DaySet>().is_err());
        assert_eq!("SAT, sun".parse::<DaySet>().unwrap(), DaySet::SATURDAY | DaySet::SUNDAY);
    }

    #[test]
    fn day_set_iter_in_week_order() {
        let days: DaySet = [Weekday::Sun, Weekday::Mon].into_iter().collect();
        assert_eq!(days.iter().collect::<Vec<_>>(), vec![Weekday::Mon, Weekday::Sun]);
        assert_eq!(DaySet::WEEKDAYS.iter().count(), 5);
        assert!(DaySet::NONE.is_empty());
    }

    #[test]
    fn window_applies_within_validity() {
        let w = AvailabilityWindow {
            id: Ulid::new(),
            instructor_id: Ulid::new(),
            weekday: Weekday::Mon,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            active: true,
            valid_from: NaiveDate::from_ymd_opt(2025, 1, 1),
            valid_until: NaiveDate::from_ymd_opt(2025, 1, 31),
            category: None,
        };
        let jan6 = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let feb3 = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        assert!(w.applies_on(jan6, Weekday::Mon));
        assert!(!w.applies_on(jan6, Weekday::Tue));
        assert!(!w.applies_on(feb3, Weekday::Mon));
        let inactive = AvailabilityWindow { active: false, ..w };
        assert!(!inactive.applies_on(jan6, Weekday::Mon));
    }

    #[test]
    fn lifecycle_edges() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Scheduled));
        assert!(Pending.can_transition_to(Declined));
        assert!(Pending.can_transition_to(Canceled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Rescheduled));
        assert!(!Scheduled.can_transition_to(Declined));
        assert!(Rescheduled.can_transition_to(Canceled));
        for terminal in [Completed, Canceled, Declined] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Scheduled));
        }
    }

    #[test]
    fn lot_usable_through_expiry_date() {
        let lot = TimeLot {
            id: Ulid::new(),
            student_id: Ulid::new(),
            package_id: Ulid::new(),
            minutes_remaining: 30,
            expires_on: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            purchased_at: 0,
        };
        assert!(lot.usable_on(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()));
        assert!(!lot.usable_on(NaiveDate::from_ymd_opt(2025, 1, 11).unwrap()));
        let empty = TimeLot { minutes_remaining: 0, ..lot };
        assert!(!empty.usable_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ResourceRegistered {
            id: Ulid::new(),
            kind: ResourceKind::Instructor,
            name: Some("Ada".into()),
            rate_cents: Some(4500),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        match decoded {
            Event::ResourceRegistered { kind, rate_cents, .. } => {
                assert_eq!(kind, ResourceKind::Instructor);
                assert_eq!(rate_cents, Some(4500));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
