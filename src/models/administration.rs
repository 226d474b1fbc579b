use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AdministrationOutcome, DoseStatus, Route};
use crate::db::DatabaseError;

/// One administered dose. Append-only: never updated or deleted once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrationEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub order_id: Uuid,
    pub patient_id: String,
    pub drug_name: String,
    pub dosage: String,
    pub route: Route,
    pub administered_by: String,
    pub administered_at: NaiveDateTime,
    pub outcome: AdministrationOutcome,
    /// Dose status at the moment timing was evaluated.
    pub timing: DoseStatus,
    /// Scheduled instant this dose satisfies, if the order runs on a schedule.
    pub scheduled_for: Option<NaiveDateTime>,
    pub override_reason: Option<String>,
    pub notes: Option<String>,
}

impl AdministrationEvent {
    /// Check the event is fit to hand to the persistence layer.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.patient_id.trim().is_empty() {
            return Err(DatabaseError::ConstraintViolation(
                "administration event has no patient".into(),
            ));
        }
        if self.administered_by.trim().is_empty() {
            return Err(DatabaseError::ConstraintViolation(
                "administration event has no administering caregiver".into(),
            ));
        }
        match self.outcome {
            AdministrationOutcome::Cancelled => Err(DatabaseError::ConstraintViolation(
                "cancelled sessions do not produce administration events".into(),
            )),
            AdministrationOutcome::OverriddenEarly | AdministrationOutcome::OverriddenMismatch
                if self
                    .override_reason
                    .as_deref()
                    .map_or(true, |r| r.trim().is_empty()) =>
            {
                Err(DatabaseError::ConstraintViolation(format!(
                    "{} outcome requires an override reason",
                    self.outcome
                )))
            }
            _ => Ok(()),
        }
    }
}
