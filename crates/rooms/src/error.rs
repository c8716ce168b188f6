//! Fehlertypen der Autoritaetsseite

use thiserror::Error;
use werkraum_core::types::RaumId;
use werkraum_protocol::FehlerCode;

/// Fehlertyp fuer Raum-Registry, Admission und Befehls-Pipeline
#[derive(Debug, Error)]
pub enum RaumError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kapazitaetsgrenze erreicht
    #[error("Raum ist voll (Kapazitaet {0})")]
    RaumVoll(u32),

    /// Raum verlangt ein Zugangsgeheimnis, keines angegeben
    #[error("Zugangsgeheimnis erforderlich")]
    GeheimnisErforderlich,

    /// Angegebenes Zugangsgeheimnis stimmt nicht
    #[error("Zugangsgeheimnis falsch")]
    GeheimnisFalsch,

    /// Kein Raum unter dieser ID registriert
    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(RaumId),

    /// Raum ist bereits aufgeloest
    #[error("Raum ist aufgeloest")]
    RaumAufgeloest,

    /// Geheimnis-Hashing fehlgeschlagen
    #[error("Geheimnis-Hashing: {0}")]
    Geheimnis(String),

    /// Verlaufs-Speicher nicht erreichbar oder fehlerhaft
    #[error("Verlaufs-Speicher: {0}")]
    Verlauf(String),

    /// Senden an Client fehlgeschlagen (Queue geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Timeout (Admission, Verlaufs-Abruf)
    #[error("Timeout")]
    Timeout,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RaumError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Bildet den Fehler auf den Protokoll-Fehlercode fuer den Client ab
    pub fn fehler_code(&self) -> FehlerCode {
        match self {
            Self::RaumVoll(_) => FehlerCode::RaumVoll,
            Self::GeheimnisErforderlich => FehlerCode::GeheimnisErforderlich,
            Self::GeheimnisFalsch => FehlerCode::GeheimnisFalsch,
            Self::RaumNichtGefunden(_) | Self::RaumAufgeloest => FehlerCode::RaumNichtGefunden,
            _ => FehlerCode::InternerFehler,
        }
    }
}

/// Result-Typ der Autoritaetsseite
pub type RaumResult<T> = Result<T, RaumError>;
