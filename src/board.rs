//! Medication board: the ward's orders ranked by urgency.
//!
//! Nothing here is stored. Every count is recomputed from the order
//! snapshot and the administration log each time the board is built.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AdministrationEvent, DoseStatus, MedicationOrder, Route};
use crate::schedule::{ScheduleCalculator, ScheduleError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardEntry {
    pub order_id: Uuid,
    pub patient_id: String,
    pub drug_name: String,
    pub dosage: String,
    pub route: Route,
    pub status: DoseStatus,
    pub due_at: Option<NaiveDateTime>,
    pub next_due: NaiveDateTime,
    pub last_administered: Option<NaiveDateTime>,
    pub administered_today: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MedicationBoard {
    pub entries: Vec<BoardEntry>,
    pub critical: usize,
    pub overdue: usize,
    pub due: usize,
    pub not_due: usize,
    pub administered_today: u32,
}

impl MedicationBoard {
    /// Entries for one patient, in board order.
    pub fn for_patient<'a>(&'a self, patient_id: &'a str) -> impl Iterator<Item = &'a BoardEntry> + 'a {
        self.entries.iter().filter(move |e| e.patient_id == patient_id)
    }
}

fn urgency_rank(status: DoseStatus) -> u8 {
    match status {
        DoseStatus::Critical => 0,
        DoseStatus::Overdue => 1,
        DoseStatus::Due => 2,
        DoseStatus::NotDue => 3,
    }
}

fn board_order(a: &BoardEntry, b: &BoardEntry) -> Ordering {
    urgency_rank(a.status)
        .cmp(&urgency_rank(b.status))
        // Slotted doses before PRN, earliest slot first.
        .then_with(|| match (a.due_at, b.due_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.next_due.cmp(&b.next_due))
        .then_with(|| a.patient_id.cmp(&b.patient_id))
        .then_with(|| a.drug_name.cmp(&b.drug_name))
}

/// Classify every order active on `now`'s date and rank by urgency.
///
/// The latest logged administration wins over the order's cached
/// `last_administered`, so a stale cache cannot hide a given dose.
pub fn build_board(
    orders: &[MedicationOrder],
    events: &[AdministrationEvent],
    calculator: &ScheduleCalculator,
    now: NaiveDateTime,
) -> Result<MedicationBoard, ScheduleError> {
    let today = now.date();
    let mut latest: HashMap<Uuid, NaiveDateTime> = HashMap::new();
    let mut given_today: HashMap<Uuid, u32> = HashMap::new();
    for event in events.iter().filter(|e| e.administered_at <= now) {
        latest
            .entry(event.order_id)
            .and_modify(|t| *t = (*t).max(event.administered_at))
            .or_insert(event.administered_at);
        if event.administered_at.date() == today {
            *given_today.entry(event.order_id).or_default() += 1;
        }
    }

    let mut board = MedicationBoard::default();
    for order in orders.iter().filter(|o| o.is_active_on(today)) {
        let last_administered = match (order.last_administered, latest.get(&order.id)) {
            (Some(cached), Some(logged)) => Some(cached.max(*logged)),
            (cached, logged) => cached.or(logged.copied()),
        };
        let mut snapshot = order.clone();
        snapshot.last_administered = last_administered;
        let assessment = calculator.assess(&snapshot, now)?;

        let administered_today = given_today.get(&order.id).copied().unwrap_or(0);
        match assessment.status {
            DoseStatus::Critical => board.critical += 1,
            DoseStatus::Overdue => board.overdue += 1,
            DoseStatus::Due => board.due += 1,
            DoseStatus::NotDue => board.not_due += 1,
        }
        board.administered_today += administered_today;
        board.entries.push(BoardEntry {
            order_id: order.id,
            patient_id: order.patient_id.clone(),
            drug_name: order.drug_name.clone(),
            dosage: order.dosage.clone(),
            route: order.route,
            status: assessment.status,
            due_at: assessment.due_at,
            next_due: assessment.next_due,
            last_administered,
            administered_today,
        });
    }

    board.entries.sort_by(board_order);
    tracing::debug!(
        entries = board.entries.len(),
        critical = board.critical,
        overdue = board.overdue,
        "Built medication board"
    );
    Ok(board)
}
