//! Fehlertypen der Client-Seite

use thiserror::Error;
use werkraum_protocol::FehlerCode;

/// Fehlertyp fuer Verbindungsaufbau und Befehlsversand
#[derive(Debug, Error)]
pub enum ClientError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Transportaufbau fehlgeschlagen
    #[error("Verbindungsfehler: {0}")]
    Verbindung(String),

    /// Zeitlimit ueberschritten
    #[error("Zeitlimit: {0}")]
    Zeitlimit(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    Getrennt,

    /// Befehl ausserhalb des synchronisierten Zustands abgesetzt
    #[error("Nicht synchronisiert – Befehl lokal verworfen")]
    NichtSynchronisiert,

    /// Admission vom Server abgelehnt (kein Wiederholungsversuch)
    #[error("Admission abgelehnt ({code:?}): {nachricht}")]
    Abgelehnt {
        code: FehlerCode,
        nachricht: String,
    },

    /// Alle Verbindungsversuche aufgebraucht
    #[error("Alle {0} Verbindungsversuche erschoepft")]
    VersucheErschoepft(u32),

    /// Versuch wurde von einem neueren Verbindungsaufbau ueberholt
    #[error("Verbindungsversuch ueberholt")]
    Ueberholt,
}

impl ClientError {
    /// Prueft ob ein weiterer Verbindungsversuch sinnvoll ist
    ///
    /// Ablehnungen durch den Server (voller Raum, falsches Geheimnis)
    /// werden nie wiederholt.
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Verbindung(_) | Self::Zeitlimit(_) | Self::Getrennt
        )
    }
}

/// Result-Typ der Client-Seite
pub type ClientResult<T> = Result<T, ClientError>;
