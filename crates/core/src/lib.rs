//! werkraum-core – Gemeinsame Typen, replizierter Zustand und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Werkraum-Crates gemeinsam genutzt werden: Identifikationstypen,
//! der replizierte Raumzustand samt Delta-Anwendung, die wiederverwendbare
//! Backoff-Richtlinie und der zentrale Fehler-Enum.

pub mod backoff;
pub mod delta;
pub mod error;
pub mod state;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use backoff::BackoffRichtlinie;
pub use delta::RaumDelta;
pub use error::{Result, WerkraumError};
pub use state::{ChatEintrag, ChatLog, GeteiltesObjekt, ObjektArt, RaumZustand, Teilnehmer};
pub use types::{FlaechenId, ObjektId, RaumId, SitzungsId};
