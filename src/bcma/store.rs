//! Persistence seam for committed administrations.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::AdministrationEvent;

/// Where committed administrations go. The only side effect of the protocol.
pub trait AdministrationStore {
    /// Append an event to the administration log. Must fail rather than
    /// overwrite if an event for the same session already exists.
    fn append_administration(&mut self, event: &AdministrationEvent) -> Result<(), DatabaseError>;

    /// Record the latest administration and the recomputed next-due cache.
    fn update_order_schedule(
        &mut self,
        order_id: &Uuid,
        last_administered: NaiveDateTime,
        next_due: NaiveDateTime,
    ) -> Result<(), DatabaseError>;
}

/// Vec-backed administration log for embedding without a database.
#[derive(Debug, Default)]
pub struct MemoryAdministrationLog {
    events: Vec<AdministrationEvent>,
    schedule: HashMap<Uuid, (NaiveDateTime, NaiveDateTime)>,
}

impl MemoryAdministrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[AdministrationEvent] {
        &self.events
    }

    pub fn events_for_order(&self, order_id: &Uuid) -> Vec<&AdministrationEvent> {
        self.events.iter().filter(|e| e.order_id == *order_id).collect()
    }

    /// Cached `(last_administered, next_due)` for an order.
    pub fn schedule_for(&self, order_id: &Uuid) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.schedule.get(order_id).copied()
    }
}

impl AdministrationStore for MemoryAdministrationLog {
    fn append_administration(&mut self, event: &AdministrationEvent) -> Result<(), DatabaseError> {
        event.validate()?;
        if self.events.iter().any(|e| e.session_id == event.session_id) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "session {} already recorded an administration",
                event.session_id
            )));
        }
        self.events.push(event.clone());
        Ok(())
    }

    fn update_order_schedule(
        &mut self,
        order_id: &Uuid,
        last_administered: NaiveDateTime,
        next_due: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        self.schedule.insert(*order_id, (last_administered, next_due));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdministrationOutcome, DoseStatus, Route};
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 4).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn make_event(order_id: Uuid) -> AdministrationEvent {
        AdministrationEvent {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            order_id,
            patient_id: "MRN-7".into(),
            drug_name: "Digoxin".into(),
            dosage: "125 mcg".into(),
            route: Route::Oral,
            administered_by: "rn.baptiste".into(),
            administered_at: at(9),
            outcome: AdministrationOutcome::Success,
            timing: DoseStatus::Due,
            scheduled_for: Some(at(9)),
            override_reason: None,
            notes: None,
        }
    }

    #[test]
    fn append_and_filter_by_order() {
        let mut log = MemoryAdministrationLog::new();
        let order = Uuid::new_v4();
        log.append_administration(&make_event(order)).unwrap();
        log.append_administration(&make_event(Uuid::new_v4())).unwrap();

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events_for_order(&order).len(), 1);
    }

    #[test]
    fn second_event_for_session_rejected() {
        let mut log = MemoryAdministrationLog::new();
        let first = make_event(Uuid::new_v4());
        let mut again = make_event(first.order_id);
        again.session_id = first.session_id;

        log.append_administration(&first).unwrap();
        assert!(matches!(
            log.append_administration(&again),
            Err(DatabaseError::ConstraintViolation(_))
        ));
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn schedule_cache_overwrites() {
        let mut log = MemoryAdministrationLog::new();
        let order = Uuid::new_v4();
        log.update_order_schedule(&order, at(9), at(21)).unwrap();
        log.update_order_schedule(&order, at(21), at(9) + chrono::Duration::days(1)).unwrap();
        assert_eq!(log.schedule_for(&order).map(|(last, _)| last), Some(at(21)));
    }
}
