//! Barcode medication administration (BCMA) safety protocol.
//!
//! A caregiver must confirm, in order:
//! 1. Right patient: wristband scan matches the order's patient
//! 2. Right medication: label drug, dose and route match the order
//! 3. Right time: the dose is due, or an early dose is acknowledged with a reason
//!
//! Only then is an administration event appended to the log. Mismatches are
//! session states, not errors, and can be retried without restarting.

mod error;
pub mod registry;
pub mod scan;
pub mod session;
pub mod store;


pub use error::BcmaError;
pub use registry::SessionRegistry;
pub use scan::{
    BarcodeRegistry, ChainedResolver, IdentityResolver, LabelDecoder, MedicationIdentity,
    RegisteredCode, ScanToken,
};
pub use session::{
    CommitReceipt, MismatchReason, Operation, SessionState, Transition, VerificationSession,
};
pub use store::{AdministrationStore, MemoryAdministrationLog};
