use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Frequency, MedicationCategory, OrderStatus, Route};

/// A standing order for a dose regimen.
///
/// `administration_times` keeps the order in which times were registered;
/// scheduling relies on that order for tie-breaks, so callers must not
/// re-sort it. `next_due` is a cache written back after each commit and is
/// never trusted over a fresh calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationOrder {
    pub id: Uuid,
    pub patient_id: String,
    pub drug_name: String,
    pub dosage: String,
    pub route: Route,
    pub frequency: Frequency,
    pub category: MedicationCategory,
    pub administration_times: Vec<NaiveTime>,
    pub status: OrderStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub last_administered: Option<NaiveDateTime>,
    pub next_due: Option<NaiveDateTime>,
}

impl MedicationOrder {
    pub fn is_prn(&self) -> bool {
        self.category == MedicationCategory::Prn
    }

    pub fn is_continuous(&self) -> bool {
        self.category == MedicationCategory::Continuous
    }

    /// Active status and `date` within the start/end window (end date inclusive).
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.status == OrderStatus::Active
            && date >= self.start_date
            && self.end_date.map_or(true, |end| date <= end)
    }
}
