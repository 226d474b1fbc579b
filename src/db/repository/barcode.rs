use std::str::FromStr;

use rusqlite::{params, Connection};

use crate::bcma::{BarcodeRegistry, MedicationIdentity, RegisteredCode, ScanToken};
use crate::db::DatabaseError;
use crate::models::Route;

const KIND_PATIENT: &str = "patient";
const KIND_MEDICATION: &str = "medication";

pub fn insert_barcode(conn: &Connection, code: &ScanToken, record: &RegisteredCode) -> Result<(), DatabaseError> {
    match record {
        RegisteredCode::Patient(patient_id) => conn.execute(
            "INSERT INTO barcode_registry (code, kind, patient_id) VALUES (?1, ?2, ?3)",
            params![code.as_str(), KIND_PATIENT, patient_id],
        )?,
        RegisteredCode::Medication(identity) => conn.execute(
            "INSERT INTO barcode_registry (code, kind, drug_name, dosage, route)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                code.as_str(),
                KIND_MEDICATION,
                identity.drug_name,
                identity.dosage,
                identity.route.as_str(),
            ],
        )?,
    };
    Ok(())
}

/// Persist every code in `registry`, in one transaction.
pub fn save_barcode_registry(conn: &Connection, registry: &BarcodeRegistry) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    for (code, record) in registry.iter() {
        let token = ScanToken::parse(code)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
        insert_barcode(&tx, &token, record)?;
    }
    tx.commit()?;
    Ok(())
}

/// Rebuild the in-memory registry from the table.
pub fn load_barcode_registry(conn: &Connection) -> Result<BarcodeRegistry, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT code, kind, patient_id, drug_name, dosage, route FROM barcode_registry ORDER BY code",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut registry = BarcodeRegistry::new();
    for row in rows {
        let (code, kind, patient_id, drug_name, dosage, route) = row?;
        let record = match (kind.as_str(), patient_id, drug_name, dosage, route) {
            (KIND_PATIENT, Some(patient_id), ..) => RegisteredCode::Patient(patient_id),
            (KIND_MEDICATION, _, Some(drug_name), Some(dosage), Some(route)) => {
                RegisteredCode::Medication(MedicationIdentity {
                    drug_name,
                    dosage,
                    route: Route::from_str(&route)?,
                })
            }
            _ => {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "barcode {code} has an incomplete {kind} record"
                )))
            }
        };
        let token = ScanToken::parse(&code)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
        registry.register(token, record)?;
    }
    Ok(registry)
}
