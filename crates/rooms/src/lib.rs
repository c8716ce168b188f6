//! werkraum-rooms – Autoritaetsseite des geteilten Werkraums
//!
//! Haelt den autoritativen Zustand aller Raeume, fuehrt die
//! Befehls-Pipeline aus und verteilt Deltas an die admittierten
//! Teilnehmer. Jeder Raum laeuft als eigener Task mit serieller
//! Auftrags-Queue; die TCP-Schicht uebersetzt Verbindungen in
//! Auftraege an diese Tasks.

pub mod befehle;
pub mod error;
pub mod flaechen;
pub mod raum;
pub mod tcp;
pub mod verbindung;
pub mod verlauf;
pub mod versand;
pub mod verwaltung;
pub mod zugang;

// Bequeme Re-Exporte
pub use befehle::Befehl;
pub use error::{RaumError, RaumResult};
pub use flaechen::FlaechenAllokator;
pub use raum::{RaumHandle, RaumOptionen};
pub use tcp::WerkraumServer;
pub use verbindung::VerbindungsKonfig;
pub use verlauf::{MemoryVerlauf, NullVerlauf, VerlaufSpeicher};
pub use verwaltung::{RaumStandards, RaumVerwaltung};
