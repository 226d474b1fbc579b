//! One administration attempt: scan patient, scan medication, check timing, commit.
//!
//! ```text
//! Idle ─start─▶ AwaitingPatientScan ─scan ok─▶ AwaitingMedicationScan ─scan ok─▶ Verified
//!                  ▲        │ wrong                ▲        │ wrong                 │ evaluate
//!                  └retry─ PatientMismatch         └retry─ MedicationMismatch        ▼
//!                                                 EarlyAdministrationWarning ◀─ not due
//!                                                          │ acknowledge             │ due
//!                                                          ▼                         ▼
//!                                                     ReadyToCommit ──commit──▶ Committed
//! any non-terminal ─cancel─▶ Cancelled
//! ```
//!
//! Every transition before `Committed` is an in-memory change. The commit
//! step calls the store; if the store fails the session stays in
//! `ReadyToCommit`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scan::{normalize_dosage, normalize_drug_name, IdentityResolver, MedicationIdentity, ScanToken};
use super::store::AdministrationStore;
use super::BcmaError;
use crate::models::{AdministrationEvent, AdministrationOutcome, DoseStatus, MedicationOrder, Route};
use crate::schedule::{self, DoseAssessment, ScheduleCalculator, ScheduleError};

// ═══════════════════════════════════════════════════════════
// States and operations
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    AwaitingPatientScan,
    PatientMismatch,
    AwaitingMedicationScan,
    MedicationMismatch,
    Verified,
    EarlyAdministrationWarning,
    ReadyToCommit,
    Committed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    StartSession,
    SubmitScan,
    Retry,
    EvaluateTiming,
    Acknowledge,
    Commit,
    Cancel,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Why a scan did not match the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchReason {
    WrongPatient { expected: String, scanned: String },
    UnrecognizedPatient { token: String },
    WrongDrug { expected: String, scanned: String },
    WrongDose { expected: String, scanned: String },
    WrongRoute { expected: Route, scanned: Route },
    UnrecognizedMedication { token: String },
}

impl std::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongPatient { expected, scanned } => {
                write!(f, "wristband is {scanned}, expected {expected}")
            }
            Self::UnrecognizedPatient { token } => write!(f, "{token} does not identify a patient"),
            Self::WrongDrug { expected, scanned } => write!(f, "label is {scanned}, order is {expected}"),
            Self::WrongDose { expected, scanned } => write!(f, "label dose {scanned}, order dose {expected}"),
            Self::WrongRoute { expected, scanned } => {
                write!(f, "label route {scanned}, order route {expected}")
            }
            Self::UnrecognizedMedication { token } => {
                write!(f, "{token} does not identify a medication")
            }
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub operation: Operation,
    pub at: NaiveDateTime,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub event: AdministrationEvent,
    pub next_due: NaiveDateTime,
    /// False when the next-due cache write failed after the event was stored.
    pub cache_updated: bool,
}

// ═══════════════════════════════════════════════════════════
// VerificationSession
// ═══════════════════════════════════════════════════════════

/// In-memory state for a single administration attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    id: Uuid,
    order: MedicationOrder,
    expected_patient: String,
    state: SessionState,
    started_at: NaiveDateTime,
    last_activity: NaiveDateTime,
    patient_token: Option<ScanToken>,
    patient_scanned_at: Option<NaiveDateTime>,
    medication_token: Option<ScanToken>,
    medication_scanned_at: Option<NaiveDateTime>,
    mismatches: Vec<MismatchReason>,
    assessment: Option<DoseAssessment>,
    override_reason: Option<String>,
    transitions: Vec<Transition>,
}

impl VerificationSession {
    /// A fresh session in `Idle`. Call `start` to begin scanning.
    pub fn new(order: MedicationOrder, expected_patient: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            order,
            expected_patient: expected_patient.into(),
            state: SessionState::Idle,
            started_at: now,
            last_activity: now,
            patient_token: None,
            patient_scanned_at: None,
            medication_token: None,
            medication_scanned_at: None,
            mismatches: Vec::new(),
            assessment: None,
            override_reason: None,
            transitions: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order(&self) -> &MedicationOrder {
        &self.order
    }

    pub fn expected_patient(&self) -> &str {
        &self.expected_patient
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn last_activity(&self) -> NaiveDateTime {
        self.last_activity
    }

    pub fn patient_token(&self) -> Option<&ScanToken> {
        self.patient_token.as_ref()
    }

    pub fn patient_scanned_at(&self) -> Option<NaiveDateTime> {
        self.patient_scanned_at
    }

    pub fn medication_token(&self) -> Option<&ScanToken> {
        self.medication_token.as_ref()
    }

    pub fn medication_scanned_at(&self) -> Option<NaiveDateTime> {
        self.medication_scanned_at
    }

    /// Every mismatch seen during the session, oldest first.
    pub fn mismatches(&self) -> &[MismatchReason] {
        &self.mismatches
    }

    pub fn assessment(&self) -> Option<&DoseAssessment> {
        self.assessment.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // ── Internals ────────────────────────────────────────

    fn reject(&self, operation: Operation) -> BcmaError {
        tracing::warn!(
            session = %self.id,
            order = %self.order.id,
            state = %self.state,
            operation = %operation,
            "Rejected operation for current session state"
        );
        BcmaError::InvalidStateTransition {
            state: self.state,
            operation,
        }
    }

    fn transition(&mut self, to: SessionState, operation: Operation, at: NaiveDateTime) -> SessionState {
        let from = self.state;
        self.transitions.push(Transition {
            from,
            to,
            operation,
            at,
        });
        self.state = to;
        self.last_activity = at;
        tracing::info!(
            session = %self.id,
            order = %self.order.id,
            from = %from,
            to = %to,
            "BCMA transition"
        );
        to
    }

    // ── Protocol ─────────────────────────────────────────

    /// Idle → AwaitingPatientScan.
    pub fn start(&mut self, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        if self.state != SessionState::Idle {
            return Err(self.reject(Operation::StartSession));
        }
        schedule::validate_order(&self.order)?;
        if self.order.patient_id != self.expected_patient {
            return Err(ScheduleError::InvalidOrderConfiguration {
                order_id: self.order.id,
                reason: format!(
                    "order belongs to patient {}, session expects {}",
                    self.order.patient_id, self.expected_patient
                ),
            }
            .into());
        }
        Ok(self.transition(SessionState::AwaitingPatientScan, Operation::StartSession, now))
    }

    /// Submit a wristband or label scan, depending on the current step.
    ///
    /// Undecodable input returns `InvalidScanToken` and leaves the state as is.
    pub fn submit_scan<R: IdentityResolver + ?Sized>(
        &mut self,
        raw: &str,
        resolver: &R,
        now: NaiveDateTime,
    ) -> Result<SessionState, BcmaError> {
        match self.state {
            SessionState::AwaitingPatientScan => {
                let token = ScanToken::parse(raw)?;
                let resolved = resolver.resolve_patient(&token)?;
                Ok(self.apply_patient_scan(token, resolved, now))
            }
            SessionState::AwaitingMedicationScan => {
                let token = ScanToken::parse(raw)?;
                let resolved = resolver.resolve_medication(&token)?;
                Ok(self.apply_medication_scan(token, resolved, now))
            }
            _ => Err(self.reject(Operation::SubmitScan)),
        }
    }

    fn apply_patient_scan(
        &mut self,
        token: ScanToken,
        resolved: Option<String>,
        now: NaiveDateTime,
    ) -> SessionState {
        let mismatch = match resolved {
            Some(id) if id == self.expected_patient => None,
            Some(id) => Some(MismatchReason::WrongPatient {
                expected: self.expected_patient.clone(),
                scanned: id,
            }),
            None => Some(MismatchReason::UnrecognizedPatient {
                token: token.to_string(),
            }),
        };
        self.patient_token = Some(token);
        self.patient_scanned_at = Some(now);

        match mismatch {
            None => self.transition(SessionState::AwaitingMedicationScan, Operation::SubmitScan, now),
            Some(reason) => {
                tracing::warn!(session = %self.id, "Patient scan mismatch: {reason}");
                self.mismatches.push(reason);
                self.transition(SessionState::PatientMismatch, Operation::SubmitScan, now)
            }
        }
    }

    fn apply_medication_scan(
        &mut self,
        token: ScanToken,
        resolved: Option<MedicationIdentity>,
        now: NaiveDateTime,
    ) -> SessionState {
        let reasons = match resolved {
            Some(identity) => self.compare_medication(&identity),
            None => vec![MismatchReason::UnrecognizedMedication {
                token: token.to_string(),
            }],
        };
        self.medication_token = Some(token);
        self.medication_scanned_at = Some(now);

        if reasons.is_empty() {
            return self.transition(SessionState::Verified, Operation::SubmitScan, now);
        }
        for reason in &reasons {
            tracing::warn!(session = %self.id, "Medication scan mismatch: {reason}");
        }
        self.mismatches.extend(reasons);
        self.transition(SessionState::MedicationMismatch, Operation::SubmitScan, now)
    }

    /// Drug, dose and route checks against the order.
    fn compare_medication(&self, scanned: &MedicationIdentity) -> Vec<MismatchReason> {
        let mut reasons = Vec::new();
        if normalize_drug_name(&scanned.drug_name) != normalize_drug_name(&self.order.drug_name) {
            reasons.push(MismatchReason::WrongDrug {
                expected: self.order.drug_name.clone(),
                scanned: scanned.drug_name.clone(),
            });
        }
        if normalize_dosage(&scanned.dosage) != normalize_dosage(&self.order.dosage) {
            reasons.push(MismatchReason::WrongDose {
                expected: self.order.dosage.clone(),
                scanned: scanned.dosage.clone(),
            });
        }
        if scanned.route != self.order.route {
            reasons.push(MismatchReason::WrongRoute {
                expected: self.order.route,
                scanned: scanned.route,
            });
        }
        reasons
    }

    /// PatientMismatch → AwaitingPatientScan, MedicationMismatch → AwaitingMedicationScan.
    pub fn retry(&mut self, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        let to = match self.state {
            SessionState::PatientMismatch => SessionState::AwaitingPatientScan,
            SessionState::MedicationMismatch => SessionState::AwaitingMedicationScan,
            _ => return Err(self.reject(Operation::Retry)),
        };
        Ok(self.transition(to, Operation::Retry, now))
    }

    /// Verified → ReadyToCommit, or EarlyAdministrationWarning for a dose not yet due.
    pub fn evaluate_timing(
        &mut self,
        calculator: &ScheduleCalculator,
        now: NaiveDateTime,
    ) -> Result<SessionState, BcmaError> {
        if self.state != SessionState::Verified {
            return Err(self.reject(Operation::EvaluateTiming));
        }
        let assessment = calculator.assess(&self.order, now)?;
        self.assessment = Some(assessment);

        let early = assessment.status == DoseStatus::NotDue && !self.order.is_prn();
        let to = if early {
            tracing::info!(
                session = %self.id,
                due_at = ?assessment.due_at,
                "Dose not yet due, early administration warning"
            );
            SessionState::EarlyAdministrationWarning
        } else {
            SessionState::ReadyToCommit
        };
        Ok(self.transition(to, Operation::EvaluateTiming, now))
    }

    /// EarlyAdministrationWarning → ReadyToCommit, with a documented reason.
    pub fn acknowledge(&mut self, reason: &str, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        if self.state != SessionState::EarlyAdministrationWarning {
            return Err(self.reject(Operation::Acknowledge));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BcmaError::MissingOverrideReason);
        }
        self.override_reason = Some(reason.to_string());
        Ok(self.transition(SessionState::ReadyToCommit, Operation::Acknowledge, now))
    }

    fn build_event(
        &self,
        administered_by: &str,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<AdministrationEvent, BcmaError> {
        let assessment = self.assessment.ok_or(BcmaError::InvalidStateTransition {
            state: self.state,
            operation: Operation::Commit,
        })?;
        let outcome = if self.override_reason.is_some() {
            AdministrationOutcome::OverriddenEarly
        } else {
            AdministrationOutcome::Success
        };
        let event = AdministrationEvent {
            id: Uuid::new_v4(),
            session_id: self.id,
            order_id: self.order.id,
            patient_id: self.expected_patient.clone(),
            drug_name: self.order.drug_name.clone(),
            dosage: self.order.dosage.clone(),
            route: self.order.route,
            administered_by: administered_by.trim().to_string(),
            administered_at: now,
            outcome,
            timing: assessment.status,
            scheduled_for: assessment.due_at,
            override_reason: self.override_reason.clone(),
            notes: notes.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
        };
        event.validate()?;
        Ok(event)
    }

    /// ReadyToCommit → Committed.
    ///
    /// Appends the event to `store`, then writes the recomputed next-due
    /// cache. If the append fails the session stays in `ReadyToCommit` and
    /// the commit can be retried. A failed cache write is logged and
    /// reported in the receipt; the event is already stored.
    pub fn commit<S: AdministrationStore + ?Sized>(
        &mut self,
        administered_by: &str,
        notes: Option<&str>,
        store: &mut S,
        calculator: &ScheduleCalculator,
        now: NaiveDateTime,
    ) -> Result<CommitReceipt, BcmaError> {
        if self.state != SessionState::ReadyToCommit {
            return Err(self.reject(Operation::Commit));
        }
        let event = self.build_event(administered_by, notes, now)?;
        let next_due = calculator.next_due_after_administration(&self.order, now)?;

        if let Err(e) = store.append_administration(&event) {
            tracing::warn!(session = %self.id, order = %self.order.id, "Administration not stored: {e}");
            return Err(BcmaError::Persistence(e));
        }

        let cache_updated = match store.update_order_schedule(&self.order.id, now, next_due) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(order = %self.order.id, "Next-due cache not updated: {e}");
                false
            }
        };

        self.order.last_administered = Some(now);
        self.order.next_due = Some(next_due);
        self.transition(SessionState::Committed, Operation::Commit, now);

        Ok(CommitReceipt {
            event,
            next_due,
            cache_updated,
        })
    }

    /// Any non-terminal state → Cancelled. No event is produced.
    pub fn cancel(&mut self, now: NaiveDateTime) -> Result<SessionState, BcmaError> {
        if self.state.is_terminal() {
            return Err(self.reject(Operation::Cancel));
        }
        Ok(self.transition(SessionState::Cancelled, Operation::Cancel, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcma::scan::LabelDecoder;
    use crate::bcma::store::MemoryAdministrationLog;
    use crate::db::DatabaseError;
    use crate::models::{Frequency, MedicationCategory, OrderStatus};
    use chrono::{NaiveDate, NaiveTime};

    const PATIENT: &str = "MRN-1001";
    const WRISTBAND: &str = "PT:MRN-1001";
    const LABEL: &str = "RX:Metoprolol;25 mg;PO";

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn make_order(category: MedicationCategory) -> MedicationOrder {
        let (frequency, times) = match category {
            MedicationCategory::Prn => (Frequency::AsNeeded, vec![]),
            _ => (
                Frequency::TwiceDaily,
                vec![
                    NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                ],
            ),
        };
        MedicationOrder {
            id: Uuid::new_v4(),
            patient_id: PATIENT.into(),
            drug_name: "Metoprolol".into(),
            dosage: "25mg".into(),
            route: Route::Oral,
            frequency,
            category,
            administration_times: times,
            status: OrderStatus::Active,
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end_date: None,
            last_administered: Some(at(8, 0) - chrono::Duration::days(1) + chrono::Duration::hours(12)),
            next_due: None,
        }
    }

    fn started(category: MedicationCategory) -> VerificationSession {
        let mut session = VerificationSession::new(make_order(category), PATIENT, at(7, 55));
        session.start(at(7, 55)).unwrap();
        session
    }

    fn verified(category: MedicationCategory) -> VerificationSession {
        let mut session = started(category);
        session.submit_scan(WRISTBAND, &LabelDecoder, at(7, 56)).unwrap();
        session.submit_scan(LABEL, &LabelDecoder, at(7, 57)).unwrap();
        assert_eq!(session.state(), SessionState::Verified);
        session
    }

    /// Store whose append always fails.
    struct FailingStore;

    impl AdministrationStore for FailingStore {
        fn append_administration(&mut self, _: &AdministrationEvent) -> Result<(), DatabaseError> {
            Err(DatabaseError::ConstraintViolation("disk full".into()))
        }

        fn update_order_schedule(
            &mut self,
            _: &Uuid,
            _: NaiveDateTime,
            _: NaiveDateTime,
        ) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    // ── start ─────────────────────────────────────────────

    #[test]
    fn new_session_is_idle_then_awaits_patient() {
        let mut session = VerificationSession::new(make_order(MedicationCategory::Scheduled), PATIENT, at(7, 0));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.start(at(7, 0)).unwrap(), SessionState::AwaitingPatientScan);
    }

    #[test]
    fn start_twice_is_invalid_transition() {
        let mut session = started(MedicationCategory::Scheduled);
        let err = session.start(at(8, 0)).unwrap_err();
        assert!(matches!(
            err,
            BcmaError::InvalidStateTransition {
                state: SessionState::AwaitingPatientScan,
                operation: Operation::StartSession
            }
        ));
    }

    #[test]
    fn start_rejects_order_for_other_patient() {
        let mut session =
            VerificationSession::new(make_order(MedicationCategory::Scheduled), "MRN-9999", at(7, 0));
        assert!(matches!(
            session.start(at(7, 0)),
            Err(BcmaError::InvalidOrderConfiguration(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn start_rejects_malformed_order() {
        let mut order = make_order(MedicationCategory::Scheduled);
        order.administration_times.clear();
        let mut session = VerificationSession::new(order, PATIENT, at(7, 0));
        assert!(matches!(
            session.start(at(7, 0)),
            Err(BcmaError::InvalidOrderConfiguration(_))
        ));
    }

    // ── patient scan ──────────────────────────────────────

    #[test]
    fn wrong_patient_then_retry_then_correct() {
        let mut session = started(MedicationCategory::Scheduled);
        assert_eq!(
            session.submit_scan("PT:MRN-2002", &LabelDecoder, at(7, 56)).unwrap(),
            SessionState::PatientMismatch
        );
        assert_eq!(
            session.mismatches(),
            &[MismatchReason::WrongPatient {
                expected: PATIENT.into(),
                scanned: "MRN-2002".into()
            }]
        );
        assert_eq!(session.retry(at(7, 57)).unwrap(), SessionState::AwaitingPatientScan);
        assert_eq!(
            session.submit_scan(WRISTBAND, &LabelDecoder, at(7, 58)).unwrap(),
            SessionState::AwaitingMedicationScan
        );
        assert_eq!(session.patient_scanned_at(), Some(at(7, 58)));
    }

    #[test]
    fn medication_label_at_patient_step_is_mismatch() {
        let mut session = started(MedicationCategory::Scheduled);
        assert_eq!(
            session.submit_scan(LABEL, &LabelDecoder, at(7, 56)).unwrap(),
            SessionState::PatientMismatch
        );
        assert!(matches!(
            session.mismatches()[0],
            MismatchReason::UnrecognizedPatient { .. }
        ));
    }

    #[test]
    fn undecodable_scan_leaves_state_unchanged() {
        let mut session = started(MedicationCategory::Scheduled);
        for raw in ["", "GARBAGE", "PT:"] {
            assert!(matches!(
                session.submit_scan(raw, &LabelDecoder, at(7, 56)),
                Err(BcmaError::InvalidScanToken { .. })
            ));
            assert_eq!(session.state(), SessionState::AwaitingPatientScan);
        }
        assert!(session.patient_token().is_none());
    }

    #[test]
    fn mismatch_state_refuses_scans_until_retry() {
        let mut session = started(MedicationCategory::Scheduled);
        session.submit_scan("PT:MRN-2002", &LabelDecoder, at(7, 56)).unwrap();
        assert!(matches!(
            session.submit_scan(WRISTBAND, &LabelDecoder, at(7, 57)),
            Err(BcmaError::InvalidStateTransition { .. })
        ));
    }

    // ── medication scan ───────────────────────────────────

    #[test]
    fn wrong_dose_and_route_both_reported() {
        let mut session = started(MedicationCategory::Scheduled);
        session.submit_scan(WRISTBAND, &LabelDecoder, at(7, 56)).unwrap();
        let state = session
            .submit_scan("RX:metoprolol;50 mg;IV", &LabelDecoder, at(7, 57))
            .unwrap();
        assert_eq!(state, SessionState::MedicationMismatch);
        assert_eq!(session.mismatches().len(), 2);
        assert!(session
            .mismatches()
            .iter()
            .any(|m| matches!(m, MismatchReason::WrongDose { .. })));
        assert!(session
            .mismatches()
            .iter()
            .any(|m| matches!(m, MismatchReason::WrongRoute { .. })));

        assert_eq!(session.retry(at(7, 58)).unwrap(), SessionState::AwaitingMedicationScan);
        assert_eq!(
            session.submit_scan(LABEL, &LabelDecoder, at(7, 59)).unwrap(),
            SessionState::Verified
        );
    }

    #[test]
    fn wrong_drug_is_mismatch() {
        let mut session = started(MedicationCategory::Scheduled);
        session.submit_scan(WRISTBAND, &LabelDecoder, at(7, 56)).unwrap();
        session.submit_scan("RX:Metformin;25 mg;PO", &LabelDecoder, at(7, 57)).unwrap();
        assert!(matches!(
            session.mismatches()[0],
            MismatchReason::WrongDrug { .. }
        ));
    }

    // ── timing ────────────────────────────────────────────

    #[test]
    fn timing_before_verification_is_rejected() {
        let mut session = started(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        assert!(matches!(
            session.evaluate_timing(&calc, at(8, 0)),
            Err(BcmaError::InvalidStateTransition {
                operation: Operation::EvaluateTiming,
                ..
            })
        ));
        assert!(session.assessment().is_none());
    }

    #[test]
    fn due_dose_goes_straight_to_ready() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        assert_eq!(session.evaluate_timing(&calc, at(8, 10)).unwrap(), SessionState::ReadyToCommit);
        assert_eq!(session.assessment().unwrap().status, DoseStatus::Due);
    }

    #[test]
    fn early_dose_needs_acknowledgement() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        assert_eq!(
            session.evaluate_timing(&calc, at(7, 58)).unwrap(),
            SessionState::EarlyAdministrationWarning
        );
        assert!(matches!(
            session.acknowledge("   ", at(7, 59)),
            Err(BcmaError::MissingOverrideReason)
        ));
        assert_eq!(session.state(), SessionState::EarlyAdministrationWarning);
        assert_eq!(
            session.acknowledge("Going to OR at 08:15", at(7, 59)).unwrap(),
            SessionState::ReadyToCommit
        );
    }

    #[test]
    fn prn_is_never_early() {
        let mut session = verified(MedicationCategory::Prn);
        let calc = ScheduleCalculator::default();
        assert_eq!(session.evaluate_timing(&calc, at(3, 0)).unwrap(), SessionState::ReadyToCommit);
    }

    // ── commit ────────────────────────────────────────────

    #[test]
    fn commit_records_success_event_and_cache() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        let mut log = MemoryAdministrationLog::new();
        session.evaluate_timing(&calc, at(8, 5)).unwrap();

        let receipt = session
            .commit("rn.jones", Some(" with breakfast "), &mut log, &calc, at(8, 6))
            .unwrap();

        assert_eq!(session.state(), SessionState::Committed);
        assert_eq!(receipt.event.outcome, AdministrationOutcome::Success);
        assert_eq!(receipt.event.scheduled_for, Some(at(8, 0)));
        assert_eq!(receipt.event.notes.as_deref(), Some("with breakfast"));
        assert_eq!(receipt.next_due, at(20, 0));
        assert!(receipt.cache_updated);
        assert_eq!(log.events().len(), 1);
        assert_eq!(log.schedule_for(&session.order().id), Some((at(8, 6), at(20, 0))));
    }

    #[test]
    fn acknowledged_early_dose_is_overridden_early() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        let mut log = MemoryAdministrationLog::new();
        session.evaluate_timing(&calc, at(7, 58)).unwrap();
        session.acknowledge("Leaving for dialysis", at(7, 58)).unwrap();

        let receipt = session.commit("rn.jones", None, &mut log, &calc, at(7, 59)).unwrap();
        assert_eq!(receipt.event.outcome, AdministrationOutcome::OverriddenEarly);
        assert_eq!(receipt.event.override_reason.as_deref(), Some("Leaving for dialysis"));
        assert_eq!(receipt.event.timing, DoseStatus::NotDue);
    }

    #[test]
    fn failed_persistence_stays_ready_to_commit() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        session.evaluate_timing(&calc, at(8, 5)).unwrap();

        let err = session
            .commit("rn.jones", None, &mut FailingStore, &calc, at(8, 6))
            .unwrap_err();
        assert!(matches!(err, BcmaError::Persistence(_)));
        assert_eq!(session.state(), SessionState::ReadyToCommit);

        let mut log = MemoryAdministrationLog::new();
        assert!(session.commit("rn.jones", None, &mut log, &calc, at(8, 7)).is_ok());
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn commit_requires_caregiver() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        let mut log = MemoryAdministrationLog::new();
        session.evaluate_timing(&calc, at(8, 5)).unwrap();
        assert!(session.commit(" ", None, &mut log, &calc, at(8, 6)).is_err());
        assert_eq!(session.state(), SessionState::ReadyToCommit);
        assert!(log.events().is_empty());
    }

    #[test]
    fn commit_from_verified_is_rejected() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        let mut log = MemoryAdministrationLog::new();
        assert!(matches!(
            session.commit("rn.jones", None, &mut log, &calc, at(8, 6)),
            Err(BcmaError::InvalidStateTransition {
                state: SessionState::Verified,
                operation: Operation::Commit
            })
        ));
    }

    // ── cancel ────────────────────────────────────────────

    #[test]
    fn cancel_from_every_open_state() {
        let calc = ScheduleCalculator::default();
        let mut sessions = vec![
            VerificationSession::new(make_order(MedicationCategory::Scheduled), PATIENT, at(7, 0)),
            started(MedicationCategory::Scheduled),
            verified(MedicationCategory::Scheduled),
        ];
        let mut mismatch = started(MedicationCategory::Scheduled);
        mismatch.submit_scan("PT:MRN-2", &LabelDecoder, at(7, 56)).unwrap();
        sessions.push(mismatch);
        let mut early = verified(MedicationCategory::Scheduled);
        early.evaluate_timing(&calc, at(7, 58)).unwrap();
        sessions.push(early);

        for mut session in sessions {
            assert_eq!(session.cancel(at(7, 59)).unwrap(), SessionState::Cancelled);
            assert!(session.is_terminal());
            assert!(matches!(
                session.cancel(at(8, 0)),
                Err(BcmaError::InvalidStateTransition {
                    state: SessionState::Cancelled,
                    operation: Operation::Cancel
                })
            ));
        }
    }

    #[test]
    fn transitions_trace_the_path() {
        let mut session = verified(MedicationCategory::Scheduled);
        let calc = ScheduleCalculator::default();
        session.evaluate_timing(&calc, at(8, 5)).unwrap();
        let path: Vec<SessionState> = session.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                SessionState::AwaitingPatientScan,
                SessionState::AwaitingMedicationScan,
                SessionState::Verified,
                SessionState::ReadyToCommit,
            ]
        );
    }

    #[test]
    fn error_names_state_and_operation() {
        let err = BcmaError::InvalidStateTransition {
            state: SessionState::Verified,
            operation: Operation::Retry,
        };
        assert_eq!(err.to_string(), "Cannot Retry while session is Verified");
    }
}
