use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::MedicationOrder;

const ORDER_COLUMNS: &str = "id, patient_id, drug_name, dosage, route, frequency, category, status,
     start_date, end_date, last_administered, next_due";

/// Insert an order together with its administration times.
pub fn insert_order(conn: &Connection, order: &MedicationOrder) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO medication_orders (id, patient_id, drug_name, dosage, route, frequency,
         category, status, start_date, end_date, last_administered, next_due)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            order.id.to_string(),
            order.patient_id,
            order.drug_name,
            order.dosage,
            order.route.as_str(),
            order.frequency.as_str(),
            order.category.as_str(),
            order.status.as_str(),
            order.start_date,
            order.end_date,
            order.last_administered,
            order.next_due,
        ],
    )?;
    for (position, time) in order.administration_times.iter().enumerate() {
        tx.execute(
            "INSERT INTO order_administration_times (order_id, position, time_of_day)
             VALUES (?1, ?2, ?3)",
            params![order.id.to_string(), position as i64, time],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_order(conn: &Connection, id: &Uuid) -> Result<Option<MedicationOrder>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM medication_orders WHERE id = ?1"),
            params![id.to_string()],
            order_row_from_rusqlite,
        )
        .optional()?;
    match row {
        Some(row) => Ok(Some(order_from_row(conn, row)?)),
        None => Ok(None),
    }
}

/// Orders with status `active`, for one patient or the whole ward.
pub fn get_active_orders(
    conn: &Connection,
    patient_id: Option<&str>,
) -> Result<Vec<MedicationOrder>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ORDER_COLUMNS} FROM medication_orders
         WHERE status = 'active' AND (?1 IS NULL OR patient_id = ?1)
         ORDER BY patient_id, drug_name"
    ))?;
    let rows = stmt.query_map(params![patient_id], order_row_from_rusqlite)?;

    let mut orders = Vec::new();
    for row in rows {
        orders.push(order_from_row(conn, row?)?);
    }
    Ok(orders)
}

pub fn discontinue_order(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medication_orders SET status = 'discontinued' WHERE id = ?1",
        params![id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "MedicationOrder".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Write the denormalized last-administered / next-due cache.
pub fn update_order_schedule(
    conn: &Connection,
    id: &Uuid,
    last_administered: NaiveDateTime,
    next_due: NaiveDateTime,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medication_orders SET last_administered = ?2, next_due = ?3 WHERE id = ?1",
        params![id.to_string(), last_administered, next_due],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "MedicationOrder".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn get_administration_times(conn: &Connection, order_id: &str) -> Result<Vec<NaiveTime>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT time_of_day FROM order_administration_times WHERE order_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![order_id], |row| row.get::<_, NaiveTime>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Row mapping ──────────────────────────────────────────

struct OrderRow {
    id: String,
    patient_id: String,
    drug_name: String,
    dosage: String,
    route: String,
    frequency: String,
    category: String,
    status: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    last_administered: Option<NaiveDateTime>,
    next_due: Option<NaiveDateTime>,
}

fn order_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<OrderRow, rusqlite::Error> {
    Ok(OrderRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        drug_name: row.get(2)?,
        dosage: row.get(3)?,
        route: row.get(4)?,
        frequency: row.get(5)?,
        category: row.get(6)?,
        status: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
        last_administered: row.get(10)?,
        next_due: row.get(11)?,
    })
}

fn order_from_row(conn: &Connection, row: OrderRow) -> Result<MedicationOrder, DatabaseError> {
    let administration_times = get_administration_times(conn, &row.id)?;
    Ok(MedicationOrder {
        id: parse_uuid(&row.id)?,
        patient_id: row.patient_id,
        drug_name: row.drug_name,
        dosage: row.dosage,
        route: Route::from_str(&row.route)?,
        frequency: Frequency::from_str(&row.frequency)?,
        category: MedicationCategory::from_str(&row.category)?,
        administration_times,
        status: OrderStatus::from_str(&row.status)?,
        start_date: row.start_date,
        end_date: row.end_date,
        last_administered: row.last_administered,
        next_due: row.next_due,
    })
}

// ── Shared column parsers ────────────────────────────────

// Ids are hyphenated TEXT rather than the 16-byte blobs rusqlite's uuid
// feature writes. Dates and times bind directly through its chrono feature.
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}
