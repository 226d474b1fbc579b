//! Scanner input: token validation and identity resolution.
//!
//! A scanned code resolves to a patient (wristband) or to a medication
//! (unit-dose label). Resolution has three outcomes:
//! - `Ok(Some(..))`: the code identifies a record of the requested kind
//! - `Ok(None)`: well-formed, but not a record of that kind (a mismatch)
//! - `Err(InvalidScanToken)`: the code cannot be decoded at all

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::BcmaError;
use crate::db::DatabaseError;
use crate::models::Route;

/// Maximum accepted length of a scanned code.
const MAX_TOKEN_LEN: usize = 128;

const PATIENT_PREFIX: &str = "PT:";
const MEDICATION_PREFIX: &str = "RX:";

/// Printable ASCII only. Keyboard-wedge scanners can leak control bytes.
static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x20-\x7E]+$").unwrap());

// ═══════════════════════════════════════════════════════════
// ScanToken
// ═══════════════════════════════════════════════════════════

/// Raw scanner input that passed basic validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanToken(String);

impl ScanToken {
    /// Trim and validate scanner input.
    pub fn parse(raw: &str) -> Result<Self, BcmaError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BcmaError::invalid_token("empty scan"));
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(BcmaError::invalid_token(format!(
                "scan longer than {MAX_TOKEN_LEN} characters"
            )));
        }
        if !TOKEN_PATTERN.is_match(trimmed) {
            return Err(BcmaError::invalid_token("scan contains non-printable characters"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScanToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════
// Medication identity
// ═══════════════════════════════════════════════════════════

/// Drug, dose and route decoded from a medication label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationIdentity {
    pub drug_name: String,
    pub dosage: String,
    pub route: Route,
}

/// Case-insensitive, whitespace-collapsed drug name.
pub fn normalize_drug_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Dose strings compare without whitespace or case ("500 mg" == "500MG").
pub fn normalize_dosage(dosage: &str) -> String {
    dosage
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

// ═══════════════════════════════════════════════════════════
// Resolver seam
// ═══════════════════════════════════════════════════════════

/// Resolves scanned tokens to identities. Supplied by the embedding application.
pub trait IdentityResolver {
    fn resolve_patient(&self, token: &ScanToken) -> Result<Option<String>, BcmaError>;

    fn resolve_medication(&self, token: &ScanToken) -> Result<Option<MedicationIdentity>, BcmaError>;
}

/// Decodes self-describing labels: `PT:<patient-id>` and `RX:<drug>;<dose>;<route>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelDecoder;

impl LabelDecoder {
    fn decode_medication(body: &str) -> Result<MedicationIdentity, BcmaError> {
        let fields: Vec<&str> = body.split(';').map(str::trim).collect();
        let [drug, dose, route] = fields.as_slice() else {
            return Err(BcmaError::invalid_token(format!(
                "medication label needs drug;dose;route, got {} field(s)",
                fields.len()
            )));
        };
        if drug.is_empty() || dose.is_empty() {
            return Err(BcmaError::invalid_token("medication label has an empty field"));
        }
        let route = Route::from_label(route)
            .ok_or_else(|| BcmaError::invalid_token(format!("unknown route '{route}'")))?;
        Ok(MedicationIdentity {
            drug_name: drug.to_string(),
            dosage: dose.to_string(),
            route,
        })
    }
}

impl IdentityResolver for LabelDecoder {
    fn resolve_patient(&self, token: &ScanToken) -> Result<Option<String>, BcmaError> {
        let raw = token.as_str();
        if let Some(id) = raw.strip_prefix(PATIENT_PREFIX) {
            let id = id.trim();
            if id.is_empty() {
                return Err(BcmaError::invalid_token("wristband carries no patient id"));
            }
            return Ok(Some(id.to_string()));
        }
        if raw.starts_with(MEDICATION_PREFIX) {
            return Ok(None);
        }
        Err(BcmaError::invalid_token(format!("unrecognized label format '{raw}'")))
    }

    fn resolve_medication(&self, token: &ScanToken) -> Result<Option<MedicationIdentity>, BcmaError> {
        let raw = token.as_str();
        if let Some(body) = raw.strip_prefix(MEDICATION_PREFIX) {
            return Self::decode_medication(body).map(Some);
        }
        if raw.starts_with(PATIENT_PREFIX) {
            return Ok(None);
        }
        Err(BcmaError::invalid_token(format!("unrecognized label format '{raw}'")))
    }
}

// ═══════════════════════════════════════════════════════════
// Barcode registry
// ═══════════════════════════════════════════════════════════

/// What a registered code points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisteredCode {
    Patient(String),
    Medication(MedicationIdentity),
}

/// Scanned number → patient or medication record.
///
/// Any well-formed code resolves: unknown codes and codes of the other
/// kind come back as `None`, so they surface as mismatches.
#[derive(Debug, Clone, Default)]
pub struct BarcodeRegistry {
    codes: HashMap<String, RegisteredCode>,
}

impl BarcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code. A code maps to exactly one record.
    pub fn register(&mut self, code: ScanToken, record: RegisteredCode) -> Result<(), DatabaseError> {
        if self.codes.contains_key(code.as_str()) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "barcode {code} is already registered"
            )));
        }
        self.codes.insert(code.0, record);
        Ok(())
    }

    pub fn get(&self, code: &ScanToken) -> Option<&RegisteredCode> {
        self.codes.get(code.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredCode)> {
        self.codes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl IdentityResolver for BarcodeRegistry {
    fn resolve_patient(&self, token: &ScanToken) -> Result<Option<String>, BcmaError> {
        Ok(match self.get(token) {
            Some(RegisteredCode::Patient(id)) => Some(id.clone()),
            _ => None,
        })
    }

    fn resolve_medication(&self, token: &ScanToken) -> Result<Option<MedicationIdentity>, BcmaError> {
        Ok(match self.get(token) {
            Some(RegisteredCode::Medication(identity)) => Some(identity.clone()),
            _ => None,
        })
    }
}

/// Registry first, self-describing labels second.
#[derive(Debug, Clone, Default)]
pub struct ChainedResolver {
    pub registry: BarcodeRegistry,
    pub labels: LabelDecoder,
}

impl ChainedResolver {
    pub fn new(registry: BarcodeRegistry) -> Self {
        Self {
            registry,
            labels: LabelDecoder,
        }
    }
}

impl IdentityResolver for ChainedResolver {
    fn resolve_patient(&self, token: &ScanToken) -> Result<Option<String>, BcmaError> {
        if self.registry.get(token).is_some() {
            return self.registry.resolve_patient(token);
        }
        self.labels.resolve_patient(token)
    }

    fn resolve_medication(&self, token: &ScanToken) -> Result<Option<MedicationIdentity>, BcmaError> {
        if self.registry.get(token).is_some() {
            return self.registry.resolve_medication(token);
        }
        self.labels.resolve_medication(token)
    }
}
