//! Open verification sessions, at most one per order.
//!
//! The registry owns the sessions and routes protocol operations to them by
//! order id. Committed or cancelled sessions are dropped right away, so a new
//! attempt for the same order can start immediately.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use super::scan::IdentityResolver;
use super::session::{CommitReceipt, Operation, SessionState, VerificationSession};
use super::store::AdministrationStore;
use super::BcmaError;
use crate::config::EngineConfig;
use crate::models::MedicationOrder;
use crate::schedule::ScheduleCalculator;

/// Sessions left untouched this long are cancelled by `expire_idle`.
pub const DEFAULT_SESSION_IDLE_MINUTES: i64 = 10;

pub struct SessionRegistry {
    sessions: HashMap<Uuid, VerificationSession>,
    calculator: ScheduleCalculator,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(
            ScheduleCalculator::default(),
            Duration::minutes(DEFAULT_SESSION_IDLE_MINUTES),
        )
    }
}

impl SessionRegistry {
    pub fn new(calculator: ScheduleCalculator, idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            calculator,
            idle_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            ScheduleCalculator::new(config.grace_period()),
            config.session_idle_timeout(),
        )
    }

    pub fn calculator(&self) -> &ScheduleCalculator {
        &self.calculator
    }

    /// Open session for an order, if any.
    pub fn session(&self, order_id: &Uuid) -> Option<&VerificationSession> {
        self.sessions.get(order_id)
    }

    /// State of the order's session. `Idle` when none is open.
    pub fn state(&self, order_id: &Uuid) -> SessionState {
        self.sessions
            .get(order_id)
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a session for `order` and move it to `AwaitingPatientScan`.
    pub fn start_session(
        &mut self,
        order: &MedicationOrder,
        expected_patient: &str,
        now: NaiveDateTime,
    ) -> Result<Uuid, BcmaError> {
        if self.sessions.contains_key(&order.id) {
            return Err(BcmaError::SessionAlreadyActive { order_id: order.id });
        }
        if !order.is_active_on(now.date()) {
            tracing::warn!(order = %order.id, status = %order.status, "Session refused for inactive order");
            return Err(BcmaError::OrderInactive { order_id: order.id });
        }

        let mut session = VerificationSession::new(order.clone(), expected_patient, now);
        session.start(now)?;
        let session_id = session.id();
        self.sessions.insert(order.id, session);
        tracing::info!(order = %order.id, session = %session_id, "Verification session opened");
        Ok(session_id)
    }

    pub fn submit_scan<R: IdentityResolver + ?Sized>(
        &mut self,
        order_id: &Uuid,
        raw: &str,
        resolver: &R,
        now: NaiveDateTime,
    ) -> Result<SessionState, BcmaError> {
        self.with_session(order_id, Operation::SubmitScan, |s| {
            s.submit_scan(raw, resolver, now)
        })
    }

    pub fn retry(&mut self, order_id: &Uuid, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        self.with_session(order_id, Operation::Retry, |s| s.retry(now))
    }

    pub fn evaluate_timing(
        &mut self,
        order_id: &Uuid,
        now: NaiveDateTime,
    ) -> Result<SessionState, BcmaError> {
        let calculator = self.calculator;
        self.with_session(order_id, Operation::EvaluateTiming, |s| {
            s.evaluate_timing(&calculator, now)
        })
    }

    pub fn acknowledge(
        &mut self,
        order_id: &Uuid,
        reason: &str,
        now: NaiveDateTime,
    ) -> Result<SessionState, BcmaError> {
        self.with_session(order_id, Operation::Acknowledge, |s| s.acknowledge(reason, now))
    }

    pub fn commit<S: AdministrationStore + ?Sized>(
        &mut self,
        order_id: &Uuid,
        administered_by: &str,
        notes: Option<&str>,
        store: &mut S,
        now: NaiveDateTime,
    ) -> Result<CommitReceipt, BcmaError> {
        let calculator = self.calculator;
        self.with_session(order_id, Operation::Commit, |s| {
            s.commit(administered_by, notes, store, &calculator, now)
        })
    }

    pub fn cancel(&mut self, order_id: &Uuid, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        self.with_session(order_id, Operation::Cancel, |s| s.cancel(now))
    }

    /// Cancel every session idle for at least the configured timeout.
    /// Returns the affected order ids.
    pub fn expire_idle(&mut self, now: NaiveDateTime) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity() >= self.idle_timeout)
            .map(|(order_id, _)| *order_id)
            .collect();

        for order_id in &stale {
            if let Some(mut session) = self.sessions.remove(order_id) {
                if let Err(e) = session.cancel(now) {
                    tracing::warn!(order = %order_id, "Expired session could not be cancelled: {e}");
                }
                tracing::info!(order = %order_id, session = %session.id(), "Idle session expired");
            }
        }
        stale
    }

    fn with_session<T>(
        &mut self,
        order_id: &Uuid,
        operation: Operation,
        f: impl FnOnce(&mut VerificationSession) -> Result<T, BcmaError>,
    ) -> Result<T, BcmaError> {
        let session = self
            .sessions
            .get_mut(order_id)
            .ok_or(BcmaError::InvalidStateTransition {
                state: SessionState::Idle,
                operation,
            })?;
        let result = f(session);
        if session.is_terminal() {
            self.sessions.remove(order_id);
        }
        result
    }
}
