use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use chrono::{Datelike, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::{minutes_of_day, time_from_minutes, TimeNormalizer};

use super::conflict::now_ms;
use super::Engine;

// ── Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    Alternate,
    Close,
    Exact,
}

/// When the requester would like to meet, in tenant-local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPreference {
    pub days: DaySet,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSearch {
    /// `None` searches every instructor.
    pub instructors: Option<Vec<Ulid>>,
    pub preference: SlotPreference,
    pub duration_minutes: u32,
    pub student_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSlotSearch {
    pub instructors: Option<Vec<Ulid>>,
    pub days: Option<DaySet>,
    pub duration_minutes: u32,
    pub student_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotCandidate {
    pub instructor_id: Ulid,
    pub instructor_name: Option<String>,
    pub rate_cents: Option<u32>,
    pub span: Span,
    pub local: LocalSlot,
    pub quality: MatchQuality,
    /// Candidate minutes outside the preferred range.
    pub proximity: u32,
    pub is_preferred_day: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenSlot {
    pub instructor_id: Ulid,
    pub instructor_name: Option<String>,
    pub rate_cents: Option<u32>,
    pub span: Span,
    pub local: LocalSlot,
}

/// Search output. An empty list always comes with a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotResults<T> {
    pub slots: Vec<T>,
    pub reason: Option<String>,
}

impl<T> SlotResults<T> {
    fn empty(reason: impl Into<String>) -> Self {
        Self { slots: Vec::new(), reason: Some(reason.into()) }
    }

    fn found(slots: Vec<T>) -> Self {
        if slots.is_empty() {
            return Self::empty(format!("no free slots in the next {SCHEDULING_HORIZON_DAYS} days"));
        }
        Self { slots, reason: None }
    }
}

// ── Scoring ──────────────────────────────────────────────────────

/// Score a candidate against the preference. `None` when it is too far off.
///
/// Proximity counts the candidate's minutes that fall outside the preferred
/// range, so a lesson sitting inside the range scores 0. Exact means it also
/// starts at the preferred start. All values are minutes since local midnight.
pub fn score(pref: &SlotPreference, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Option<(MatchQuality, u32)> {
    let (ps, pe) = (minutes_of_day(pref.start), minutes_of_day(pref.end));
    let (cs, ce) = (minutes_of_day(start), minutes_of_day(end));
    let cand_len = ce.saturating_sub(cs);
    let overlap = pe.min(ce).saturating_sub(ps.max(cs)).min(cand_len);
    let proximity = cand_len - overlap;
    if proximity > MAX_PROXIMITY {
        return None;
    }
    let preferred_day = pref.days.contains(weekday);
    let quality = if preferred_day && cs == ps && ce <= pe {
        MatchQuality::Exact
    } else if preferred_day && proximity <= CLOSE_MATCH_MAX_PROXIMITY {
        MatchQuality::Close
    } else {
        MatchQuality::Alternate
    };
    Some((quality, proximity))
}

/// Quality desc, proximity asc, then earlier start.
fn rank(a: &SlotCandidate, b: &SlotCandidate) -> Ordering {
    b.quality
        .cmp(&a.quality)
        .then(a.proximity.cmp(&b.proximity))
        .then(a.span.start.cmp(&b.span.start))
        .then(a.instructor_id.cmp(&b.instructor_id))
}

// ── Candidate generation ─────────────────────────────────────────

/// Legal, conflict-free starts for one instructor within `horizon`.
///
/// `cursor_for` picks the first start tried in a window given its weekday and
/// the window's own start.
pub(crate) fn generate(
    tn: &TimeNormalizer,
    instructor: &ResourceState,
    student_busy: &[Span],
    horizon: Span,
    duration_minutes: u32,
    step_minutes: u32,
    cursor_for: impl Fn(Weekday, NaiveTime) -> NaiveTime,
) -> Vec<(Span, LocalSlot)> {
    let mut out = Vec::new();
    let (Ok(first), Ok(last)) = (tn.local_date(horizon.start), tn.local_date(horizon.end)) else {
        return out;
    };
    if duration_minutes == 0 || step_minutes == 0 {
        return out;
    }

    for date in first.iter_days().take_while(|d| *d <= last) {
        let weekday = date.weekday();
        for window in instructor.windows_on(date, weekday) {
            let window_end = minutes_of_day(window.end);
            let mut cursor = minutes_of_day(cursor_for(weekday, window.start));
            while let Some(cursor_end) = cursor.checked_add(duration_minutes).filter(|e| *e <= window_end) {
                let start = time_from_minutes(cursor);
                let end = time_from_minutes(cursor_end);
                cursor = cursor.saturating_add(step_minutes);
                let (Some(start), Some(end)) = (start, end) else { continue };
                let Ok(span) = tn.span_for(date, start, end) else { continue };
                if span.start < horizon.start || span.end > horizon.end {
                    continue;
                }
                // Blocks (manual or mirrored) and bookings all make the instructor busy.
                if instructor.overlapping(&span).next().is_some() {
                    continue;
                }
                if student_busy.iter().any(|b| b.overlaps(&span)) {
                    continue;
                }
                out.push((span, LocalSlot { date, weekday, start, end }));
            }
        }
    }
    out
}

/// Best candidate per (instructor, weekday), ranked.
pub(crate) fn best_per_weekday(candidates: Vec<SlotCandidate>) -> Vec<SlotCandidate> {
    let mut best: HashMap<(Ulid, Weekday), SlotCandidate> = HashMap::new();
    for c in candidates {
        match best.get(&(c.instructor_id, c.local.weekday)) {
            Some(current) if rank(current, &c) != Ordering::Greater => {}
            _ => {
                best.insert((c.instructor_id, c.local.weekday), c);
            }
        }
    }
    let mut out: Vec<SlotCandidate> = best.into_values().collect();
    out.sort_by(rank);
    out
}

// ── Engine entry points ──────────────────────────────────────────

impl Engine {
    /// Ranked suggestions for the next two weeks.
    pub async fn find_slots(&self, search: &SlotSearch) -> SlotResults<SlotCandidate> {
        self.find_slots_at(search, now_ms()).await
    }

    pub async fn find_slots_at(&self, search: &SlotSearch, now: Ms) -> SlotResults<SlotCandidate> {
        let started = Instant::now();
        let pref = &search.preference;
        if search.duration_minutes == 0 {
            return SlotResults::empty("duration must be positive");
        }
        if search.duration_minutes > MAX_SLOT_DURATION_MINUTES {
            return SlotResults::empty("duration must fit within a day");
        }
        if pref.start >= pref.end {
            return SlotResults::empty("preferred start must be before preferred end");
        }
        let Some((horizon, student_busy, instructors)) =
            self.search_inputs(now, search.student_id, search.instructors.as_deref()).await
        else {
            return SlotResults::empty("student not found");
        };
        if instructors.is_empty() {
            return SlotResults::empty("no instructors to search");
        }

        let tn = self.normalizer();
        let mut candidates = Vec::new();
        for id in instructors {
            let Some(rs) = self.store.get_resource(&id) else { continue };
            let rs = rs.read().await;
            if rs.kind != ResourceKind::Instructor {
                continue;
            }
            let cursor_for = |weekday: Weekday, window_start: NaiveTime| {
                if pref.days.contains(weekday) { window_start.max(pref.start) } else { window_start }
            };
            for (span, local) in generate(
                tn,
                &rs,
                &student_busy,
                horizon,
                search.duration_minutes,
                PREFERENCE_STEP_MINUTES,
                cursor_for,
            ) {
                let Some((quality, proximity)) = score(pref, local.weekday, local.start, local.end) else {
                    continue;
                };
                candidates.push(SlotCandidate {
                    instructor_id: rs.id,
                    instructor_name: rs.name.clone(),
                    rate_cents: rs.rate_cents,
                    span,
                    local,
                    quality,
                    proximity,
                    is_preferred_day: pref.days.contains(local.weekday),
                });
            }
        }

        let slots = best_per_weekday(candidates);
        metrics::histogram!(crate::observability::SLOT_SEARCH_DURATION_SECONDS, "mode" => "preferred")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!("slot search returned {} candidates", slots.len());
        SlotResults::found(slots)
    }

    /// Every free slot of the given length, unscored.
    pub async fn find_open_slots(&self, search: &OpenSlotSearch) -> SlotResults<OpenSlot> {
        self.find_open_slots_at(search, now_ms()).await
    }

    pub async fn find_open_slots_at(&self, search: &OpenSlotSearch, now: Ms) -> SlotResults<OpenSlot> {
        let started = Instant::now();
        if search.duration_minutes == 0 {
            return SlotResults::empty("duration must be positive");
        }
        if search.duration_minutes > MAX_SLOT_DURATION_MINUTES {
            return SlotResults::empty("duration must fit within a day");
        }
        let Some((horizon, student_busy, instructors)) =
            self.search_inputs(now, search.student_id, search.instructors.as_deref()).await
        else {
            return SlotResults::empty("student not found");
        };
        if instructors.is_empty() {
            return SlotResults::empty("no instructors to search");
        }

        let tn = self.normalizer();
        let mut slots = Vec::new();
        for id in instructors {
            let Some(rs) = self.store.get_resource(&id) else { continue };
            let rs = rs.read().await;
            if rs.kind != ResourceKind::Instructor {
                continue;
            }
            let found = generate(
                tn,
                &rs,
                &student_busy,
                horizon,
                search.duration_minutes,
                OPEN_STEP_MINUTES,
                |_, window_start| window_start,
            );
            for (span, local) in found {
                if search.days.is_some_and(|days| !days.contains(local.weekday)) {
                    continue;
                }
                slots.push(OpenSlot {
                    instructor_id: rs.id,
                    instructor_name: rs.name.clone(),
                    rate_cents: rs.rate_cents,
                    span,
                    local,
                });
            }
        }

        slots.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(a.instructor_id.cmp(&b.instructor_id))
        });
        slots.dedup_by(|a, b| a.instructor_id == b.instructor_id && a.span == b.span);
        metrics::histogram!(crate::observability::SLOT_SEARCH_DURATION_SECONDS, "mode" => "open")
            .record(started.elapsed().as_secs_f64());
        SlotResults::found(slots)
    }

    /// Horizon, the student's busy spans, and the instructors to scan.
    /// `None` if the student is unknown.
    ///
    /// The student's calendar is copied up front so at most one lock is held at a time.
    async fn search_inputs(
        &self,
        now: Ms,
        student_id: Option<Ulid>,
        instructors: Option<&[Ulid]>,
    ) -> Option<(Span, Vec<Span>, Vec<Ulid>)> {
        let horizon = Span::new(now, now + SCHEDULING_HORIZON_DAYS * DAY_MS);

        let student_busy = match student_id {
            Some(id) => {
                let rs = self.store.get_resource(&id)?;
                let rs = rs.read().await;
                if rs.kind != ResourceKind::Student {
                    return None;
                }
                rs.overlapping(&horizon).map(|i| i.span).collect()
            }
            None => Vec::new(),
        };

        let ids = match instructors {
            Some(ids) => ids.iter().take(MAX_SEARCH_INSTRUCTORS).copied().collect(),
            None => self.store.resource_ids(),
        };
        Some((horizon, student_busy, ids))
    }
}
