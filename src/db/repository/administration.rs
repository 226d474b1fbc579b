use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::order::parse_uuid;
use crate::bcma::AdministrationStore;
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::AdministrationEvent;

const EVENT_COLUMNS: &str = "id, session_id, order_id, patient_id, drug_name, dosage, route,
     administered_by, administered_at, outcome, timing, scheduled_for, override_reason, notes";

/// Append an administration event. The table rejects updates and deletes.
pub fn insert_administration(conn: &Connection, event: &AdministrationEvent) -> Result<(), DatabaseError> {
    event.validate()?;
    conn.execute(
        "INSERT INTO administration_events (id, session_id, order_id, patient_id, drug_name,
         dosage, route, administered_by, administered_at, outcome, timing, scheduled_for,
         override_reason, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            event.id.to_string(),
            event.session_id.to_string(),
            event.order_id.to_string(),
            event.patient_id,
            event.drug_name,
            event.dosage,
            event.route.as_str(),
            event.administered_by,
            event.administered_at,
            event.outcome.as_str(),
            event.timing.as_str(),
            event.scheduled_for,
            event.override_reason,
            event.notes,
        ],
    )?;
    Ok(())
}

/// Events for an order, oldest first.
pub fn get_administrations_for_order(
    conn: &Connection,
    order_id: &Uuid,
) -> Result<Vec<AdministrationEvent>, DatabaseError> {
    query_events(
        conn,
        &format!(
            "SELECT {EVENT_COLUMNS} FROM administration_events
             WHERE order_id = ?1 ORDER BY administered_at"
        ),
        &order_id.to_string(),
    )
}

/// Events for a patient across all orders, oldest first.
pub fn get_administrations_for_patient(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<AdministrationEvent>, DatabaseError> {
    query_events(
        conn,
        &format!(
            "SELECT {EVENT_COLUMNS} FROM administration_events
             WHERE patient_id = ?1 ORDER BY administered_at"
        ),
        patient_id,
    )
}

fn query_events(conn: &Connection, sql: &str, key: &str) -> Result<Vec<AdministrationEvent>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], event_row_from_rusqlite)?;

    let mut events = Vec::new();
    for row in rows {
        events.push(event_from_row(row?)?);
    }
    Ok(events)
}

impl AdministrationStore for Connection {
    fn append_administration(&mut self, event: &AdministrationEvent) -> Result<(), DatabaseError> {
        insert_administration(self, event)
    }

    fn update_order_schedule(
        &mut self,
        order_id: &Uuid,
        last_administered: NaiveDateTime,
        next_due: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        super::order::update_order_schedule(self, order_id, last_administered, next_due)
    }
}

// ── Row mapping ──────────────────────────────────────────

struct EventRow {
    id: String,
    session_id: String,
    order_id: String,
    patient_id: String,
    drug_name: String,
    dosage: String,
    route: String,
    administered_by: String,
    administered_at: NaiveDateTime,
    outcome: String,
    timing: String,
    scheduled_for: Option<NaiveDateTime>,
    override_reason: Option<String>,
    notes: Option<String>,
}

fn event_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<EventRow, rusqlite::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        order_id: row.get(2)?,
        patient_id: row.get(3)?,
        drug_name: row.get(4)?,
        dosage: row.get(5)?,
        route: row.get(6)?,
        administered_by: row.get(7)?,
        administered_at: row.get(8)?,
        outcome: row.get(9)?,
        timing: row.get(10)?,
        scheduled_for: row.get(11)?,
        override_reason: row.get(12)?,
        notes: row.get(13)?,
    })
}

fn event_from_row(row: EventRow) -> Result<AdministrationEvent, DatabaseError> {
    Ok(AdministrationEvent {
        id: parse_uuid(&row.id)?,
        session_id: parse_uuid(&row.session_id)?,
        order_id: parse_uuid(&row.order_id)?,
        patient_id: row.patient_id,
        drug_name: row.drug_name,
        dosage: row.dosage,
        route: Route::from_str(&row.route)?,
        administered_by: row.administered_by,
        administered_at: row.administered_at,
        outcome: AdministrationOutcome::from_str(&row.outcome)?,
        timing: DoseStatus::from_str(&row.timing)?,
        scheduled_for: row.scheduled_for,
        override_reason: row.override_reason,
        notes: row.notes,
    })
}

/// Number of doses recorded for an order at or after `since`.
pub fn count_administrations_since(
    conn: &Connection,
    order_id: &Uuid,
    since: NaiveDateTime,
) -> Result<u32, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM administration_events WHERE order_id = ?1 AND administered_at >= ?2",
        params![order_id.to_string(), since],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}
