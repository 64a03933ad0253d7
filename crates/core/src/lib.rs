//! tsvoice-core – Gemeinsame Typen, Uhren und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen tsvoice-Crates gemeinsam genutzt werden.

pub mod clock;
pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, TsVoiceError};
pub use types::{ClientId, ConnectionState};
