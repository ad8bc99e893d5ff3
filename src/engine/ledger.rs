use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError, ResourceGuards};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLot {
    pub id: Ulid,
    pub student_id: Ulid,
    pub package_id: Ulid,
    pub minutes: u32,
    pub expires_on: NaiveDate,
}

/// Minutes a student can still spend on `as_of`.
pub fn usable_balance(lots: &[TimeLot], as_of: NaiveDate) -> u32 {
    lots.iter()
        .filter(|l| l.usable_on(as_of))
        .map(|l| l.minutes_remaining)
        .sum()
}

/// Decide how `needed` minutes are drawn: soonest-expiring lot first, then
/// oldest purchase, then lot id. Returns `(lot_id, minutes)` per touched lot.
pub fn plan_consumption(lots: &[TimeLot], needed: u32, as_of: NaiveDate) -> Result<Vec<(Ulid, u32)>, EngineError> {
    let mut usable: Vec<&TimeLot> = lots.iter().filter(|l| l.usable_on(as_of)).collect();
    let available: u32 = usable.iter().map(|l| l.minutes_remaining).sum();
    if available < needed {
        return Err(EngineError::InsufficientBalance { available, needed });
    }
    usable.sort_by_key(|l| (l.expires_on, l.purchased_at, l.id));

    let mut remaining = needed;
    let mut plan = Vec::new();
    for lot in usable {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(lot.minutes_remaining);
        plan.push((lot.id, take));
        remaining -= take;
    }
    Ok(plan)
}

pub(crate) fn deductions_for(plan: &[(Ulid, u32)], session_id: Ulid, student_id: Ulid, at: Ms) -> Vec<Deduction> {
    plan.iter()
        .map(|(lot_id, minutes)| Deduction {
            id: Ulid::new(),
            session_id,
            student_id,
            lot_id: *lot_id,
            minutes: *minutes,
            at,
        })
        .collect()
}

pub(crate) fn record_shortfall(err: &EngineError) {
    if let EngineError::InsufficientBalance { available, needed } = err {
        metrics::counter!(crate::observability::LEDGER_SHORTFALLS_TOTAL).increment(1);
        tracing::debug!("ledger shortfall: {available} available, {needed} needed");
    }
}

impl Engine {
    pub async fn purchase_lot(&self, lot: NewLot) -> Result<TimeLot, EngineError> {
        if lot.minutes == 0 {
            return Err(EngineError::Validation("a lot must hold at least one minute".into()));
        }
        let mut locked = self.lock_many(&[(lot.student_id, ResourceKind::Student)]).await?;
        let student = locked
            .resource(lot.student_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Student, lot.student_id))?;
        if student.lots.len() >= MAX_LOTS_PER_STUDENT {
            return Err(EngineError::LimitExceeded("too many lots for student"));
        }
        if student.lots.iter().any(|l| l.id == lot.id) {
            return Err(EngineError::AlreadyExists(lot.id));
        }

        let lot = TimeLot {
            id: lot.id,
            student_id: lot.student_id,
            package_id: lot.package_id,
            minutes_remaining: lot.minutes,
            expires_on: lot.expires_on,
            purchased_at: now_ms(),
        };
        self.commit(Event::LotPurchased { lot: lot.clone() }, &mut locked).await?;
        info!("student {} purchased {} minutes (lot {})", lot.student_id, lot.minutes_remaining, lot.id);
        Ok(lot)
    }

    /// Draw minutes for a session, valid as of today in the tenant zone.
    pub async fn consume(&self, student_id: Ulid, minutes: u32, session_id: Ulid) -> Result<Vec<Deduction>, EngineError> {
        let today = self.normalizer().local_date(now_ms())?;
        self.consume_as_of(student_id, minutes, session_id, today).await
    }

    /// Draw minutes for a session against lots not expired on `as_of`.
    /// All lot decrements commit together, or none do.
    pub async fn consume_as_of(
        &self,
        student_id: Ulid,
        minutes: u32,
        session_id: Ulid,
        as_of: NaiveDate,
    ) -> Result<Vec<Deduction>, EngineError> {
        let session = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::NotFound { kind: "session", id: session_id })?;
        if session.student_id != student_id {
            return Err(EngineError::Validation(format!(
                "session {session_id} does not belong to student {student_id}"
            )));
        }

        let mut locked = self.lock_many(&[(student_id, ResourceKind::Student)]).await?;
        let student = locked
            .resource(student_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Student, student_id))?;
        let plan = plan_consumption(&student.lots, minutes, as_of).inspect_err(record_shortfall)?;
        let deductions = deductions_for(&plan, session_id, student_id, now_ms());
        if deductions.is_empty() {
            return Ok(deductions);
        }

        self.commit(
            Event::MinutesConsumed { student_id, deductions: deductions.clone() },
            &mut locked,
        )
        .await?;
        metrics::counter!(crate::observability::MINUTES_CONSUMED_TOTAL).increment(u64::from(minutes));
        info!("consumed {minutes} minutes from {} lots for session {session_id}", deductions.len());
        Ok(deductions)
    }

    pub async fn balance(&self, student_id: Ulid, as_of: NaiveDate) -> Result<u32, EngineError> {
        let locked = self.read_many(&[(student_id, ResourceKind::Student)]).await?;
        let student = locked
            .resource(student_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Student, student_id))?;
        Ok(usable_balance(&student.lots, as_of))
    }

    pub async fn lots(&self, student_id: Ulid) -> Result<Vec<TimeLot>, EngineError> {
        let locked = self.read_many(&[(student_id, ResourceKind::Student)]).await?;
        let student = locked
            .resource(student_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Student, student_id))?;
        Ok(student.lots.clone())
    }

    pub async fn deductions(&self, student_id: Ulid) -> Result<Vec<Deduction>, EngineError> {
        let locked = self.read_many(&[(student_id, ResourceKind::Student)]).await?;
        let student = locked
            .resource(student_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Student, student_id))?;
        Ok(student.deductions.clone())
    }
}
