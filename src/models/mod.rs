pub mod administration;
pub mod enums;
pub mod medication;

pub use administration::*;
pub use enums::*;
pub use medication::*;
