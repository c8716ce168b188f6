//! Fehlertypen fuer Werkraum
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Werkraum
pub type Result<T> = std::result::Result<T, WerkraumError>;

/// Alle moeglichen Fehler im Werkraum-System
#[derive(Debug, Error)]
pub enum WerkraumError {
    // --- Verbindung & Netzwerk (Transient) ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Admission ---
    #[error("Raum voll: Kapazitaet {0} erreicht")]
    Kapazitaet(u32),

    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Medien ---
    #[error("Medien-Verhandlung fehlgeschlagen ({peer}): {grund}")]
    MedienVerhandlung { peer: String, grund: String },

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl WerkraumError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    ///
    /// Kapazitaets- und Authentifizierungsfehler sind NICHT wiederholbar:
    /// ohne neue Eingabe fuehrt ein erneuter Versuch zum selben Ergebnis.
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = WerkraumError::Authentifizierung("Falsches Geheimnis".into());
        assert_eq!(
            e.to_string(),
            "Authentifizierung fehlgeschlagen: Falsches Geheimnis"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(WerkraumError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(WerkraumError::Getrennt("test".into()).ist_wiederholbar());
        assert!(!WerkraumError::Kapazitaet(16).ist_wiederholbar());
        assert!(!WerkraumError::Authentifizierung("test".into()).ist_wiederholbar());
    }

    #[test]
    fn kapazitaets_fehler_nennt_grenze() {
        let e = WerkraumError::Kapazitaet(16);
        assert!(e.to_string().contains("16"));
    }
}
