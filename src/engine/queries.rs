use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, ResourceGuards};

/// Registry view of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub name: Option<String>,
    pub rate_cents: Option<u32>,
}

impl Engine {
    pub async fn get_resource_info(&self, id: Ulid) -> Option<ResourceInfo> {
        let rs = self.store.get_resource(&id)?;
        let guard = rs.read().await;
        Some(ResourceInfo {
            id: guard.id,
            kind: guard.kind,
            name: guard.name.clone(),
            rate_cents: guard.rate_cents,
        })
    }

    /// All resources of a kind, ordered by id.
    pub async fn list_resources(&self, kind: ResourceKind) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for id in self.store.resource_ids() {
            if let Some(info) = self.get_resource_info(id).await
                && info.kind == kind
            {
                out.push(info);
            }
        }
        out
    }

    pub fn subjects(&self) -> Vec<Subject> {
        let mut out: Vec<Subject> = self.store.subjects.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn get_session(&self, id: Ulid) -> Option<Session> {
        self.store.get_session(&id)
    }

    /// Sessions occupying or having occupied a resource, ordered by start.
    /// Pass a span to restrict to overlapping sessions.
    pub fn sessions_for(&self, resource_id: Ulid, within: Option<Span>) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .store
            .sessions
            .iter()
            .filter(|e| {
                let s = e.value();
                (s.instructor_id == resource_id
                    || s.student_id == resource_id
                    || s.classroom_id == Some(resource_id))
                    && within.is_none_or(|w| w.overlaps(&s.span()))
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| (s.span().start, s.id));
        out
    }

    pub fn get_series(&self, id: Ulid) -> Option<Series> {
        self.store.series.get(&id).map(|e| e.value().clone())
    }

    pub fn series_sessions(&self, series_id: Ulid) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .store
            .sessions
            .iter()
            .filter(|e| e.value().series_id == Some(series_id))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| s.span().start);
        out
    }

    pub fn attendance(&self, session_id: Ulid) -> Option<AttendanceRecord> {
        self.store.attendance.get(&session_id).map(|e| e.value().clone())
    }

    pub async fn windows(&self, instructor_id: Ulid) -> Result<Vec<AvailabilityWindow>, EngineError> {
        let locked = self.read_many(&[(instructor_id, ResourceKind::Instructor)]).await?;
        let rs = locked
            .resource(instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, instructor_id))?;
        let mut out = rs.windows.clone();
        out.sort_by_key(|w| (w.weekday.num_days_from_monday(), w.start, w.id));
        Ok(out)
    }

    /// Manual and mirrored blocks overlapping `within`, or all of them.
    pub async fn unavailability(
        &self,
        instructor_id: Ulid,
        within: Option<Span>,
    ) -> Result<Vec<UnavailabilityBlock>, EngineError> {
        let locked = self.read_many(&[(instructor_id, ResourceKind::Instructor)]).await?;
        let rs = locked
            .resource(instructor_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Instructor, instructor_id))?;
        Ok(rs
            .blocks(instructor_id)
            .into_iter()
            .filter(|b| within.is_none_or(|w| w.overlaps(&b.span)))
            .collect())
    }
}
