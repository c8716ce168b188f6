//! werkraum-protocol – Nachrichten- und Wire-Format
//!
//! Definiert die Steuerungsnachrichten zwischen Client und
//! Autoritaetsprozess (Beitritt, Befehle, Deltas, Lobby-Ereignisse) sowie
//! das Frame-Format (u32 BE Laenge + JSON-Payload).

pub mod control;
pub mod wire;

// Bequeme Re-Exporte
pub use control::{
    BeitrittsAnfrage, BeitrittsBestaetigung, ErstellAnfrage, FehlerAntwort, FehlerCode,
    LobbyEreignis, RaumMetadaten, RaumNachricht, RaumPayload, SchliessCode,
};
pub use wire::FrameCodec;
