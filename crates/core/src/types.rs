//! Gemeinsame Identifikationstypen fuer Werkraum
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Raum-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RaumId(pub Uuid);

impl RaumId {
    /// Erstellt eine neue zufaellige RaumId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for RaumId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RaumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "raum:{}", self.0)
    }
}

/// Eindeutige Sitzungs-ID eines admittierten Teilnehmers
///
/// Wird vom Autoritaetsprozess pro Verbindungsversuch neu vergeben und ist
/// NICHT stabil ueber Reconnects hinweg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SitzungsId(pub Uuid);

impl SitzungsId {
    /// Erstellt eine neue zufaellige SitzungsId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SitzungsId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SitzungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sitzung:{}", self.0)
    }
}

/// ID eines geteilten Objekts innerhalb eines Raums
///
/// Die Objektmenge steht bei Raumerstellung fest ("terminal-0" .. "tafel-2"),
/// daher ein String-Newtype statt einer UUID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjektId(pub String);

impl ObjektId {
    /// ID des n-ten Terminals
    pub fn terminal(n: usize) -> Self {
        Self(format!("terminal-{n}"))
    }

    /// ID der n-ten Tafel
    pub fn tafel(n: usize) -> Self {
        Self(format!("tafel-{n}"))
    }
}

impl std::fmt::Display for ObjektId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "objekt:{}", self.0)
    }
}

/// Kollaborationsflaechen-ID einer Tafel
///
/// 12 Zeichen aus dem festen Alphabet `0-9a-zA-Z`, vergeben durch den
/// `FlaechenAllokator` im Autoritaetsprozess.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlaechenId(pub String);

impl std::fmt::Display for FlaechenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flaeche:{}", self.0)
    }
}
