//! Steuerungs-Protokoll zwischen Client und Autoritaetsprozess
//!
//! ## Design
//! - Request/Response-Pattern: jede Nachricht traegt eine `request_id: u32`
//! - JSON-Serialisierung via serde (Steuerkanal, nicht zeitkritisch)
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - Unbekannte oder unerwartete Nachrichtenarten werden geloggt und
//!   ignoriert, nie fatal behandelt

use serde::{Deserialize, Serialize};
use werkraum_core::delta::RaumDelta;
use werkraum_core::state::RaumZustand;
use werkraum_core::types::{ObjektId, RaumId, SitzungsId};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FehlerCode {
    // Allgemein
    InternerFehler,
    UngueltigeAnfrage,
    // Admission
    RaumVoll,
    RaumNichtGefunden,
    GeheimnisErforderlich,
    GeheimnisFalsch,
    BereitsBeigetreten,
}

// ---------------------------------------------------------------------------
// Schliess-Codes
// ---------------------------------------------------------------------------

/// Schliess-Code einer Transportverbindung
///
/// Unterscheidet geordnete von abnormalen Trennungen; die Client-
/// Zustandsmaschine reconnectet nur nach abnormalen Trennungen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchliessCode {
    /// Geordnete Trennung auf Wunsch einer Seite
    Normal,
    /// Server faehrt herunter (geordnet, kein Reconnect-Ziel)
    ServerSchliessung,
    /// Abnormale Trennung (Netzausfall, Reset, Protokollfehler)
    Abbruch,
}

impl SchliessCode {
    /// Gibt true zurueck wenn die Trennung nicht geordnet war
    pub fn ist_abnormal(&self) -> bool {
        matches!(self, Self::Abbruch)
    }
}

// ---------------------------------------------------------------------------
// Beitritt & Erstellung
// ---------------------------------------------------------------------------

/// Beitrittsanfrage fuer einen bestehenden Raum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeitrittsAnfrage {
    pub raum_id: RaumId,
    /// Zugangsgeheimnis (Klartext auf dem Kanal – serverseitig nur als
    /// Argon2-Hash gespeichert und verglichen)
    pub geheimnis: Option<String>,
    /// Gewuenschter Anzeigename (darf leer sein)
    pub name: String,
}

/// Anfrage einen neuen Raum zu erstellen und ihm beizutreten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErstellAnfrage {
    pub raum_name: String,
    pub beschreibung: Option<String>,
    pub geheimnis: Option<String>,
    /// Raum automatisch aufloesen sobald er leer ist
    pub auto_aufloesen: bool,
    /// Kapazitaetsgrenze (None = Server-Standard)
    pub kapazitaet: Option<u32>,
    /// Gewuenschter Anzeigename des Erstellers
    pub name: String,
}

/// Bestaetigung einer erfolgreichen Admission
///
/// Enthaelt den vollstaendigen Schnappschuss; danach folgen nur noch
/// Deltas ab genau diesem Stand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeitrittsBestaetigung {
    pub raum_id: RaumId,
    /// Fuer diese Verbindung vergebene Sitzungs-ID
    pub sitzung: SitzungsId,
    pub schnappschuss: RaumZustand,
}

// ---------------------------------------------------------------------------
// Lobby / Raum-Discovery
// ---------------------------------------------------------------------------

/// Metadaten eines Raums fuer die Lobby-Auflistung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaumMetadaten {
    pub raum_id: RaumId,
    pub name: String,
    pub beschreibung: Option<String>,
    pub hat_geheimnis: bool,
    pub teilnehmer_anzahl: u32,
    pub kapazitaet: u32,
}

/// Benachrichtigungen der Raum-Discovery-Oberflaeche
///
/// Wird vom Autoritaetsprozess an Lobby-Konsumenten verteilt, jeweils
/// geschluesselt nach Raum-ID mit einem Metadaten-Blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LobbyEreignis {
    RaumHinzugefuegt(RaumMetadaten),
    RaumEntfernt { raum_id: RaumId },
    RaumListeGeaendert(RaumMetadaten),
}

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehlerantwort des Servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FehlerAntwort {
    pub code: FehlerCode,
    pub nachricht: String,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Keepalive-Ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp_ms: u64,
}

/// Keepalive-Pong (traegt den Ping-Zeitstempel fuer RTT-Messung)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub ping_timestamp_ms: u64,
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Payload & Nachricht
// ---------------------------------------------------------------------------

/// Alle Nachrichtenarten des Steuerkanals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaumPayload {
    // --- Client -> Server: Sitzungsverwaltung ---
    Beitreten(BeitrittsAnfrage),
    Erstellen(ErstellAnfrage),
    /// Geordneter Abschied (beide Richtungen)
    Abschied { grund: Option<String> },

    // --- Client -> Server: die sieben Befehle ---
    PositionAktualisieren { x: f32, y: f32, anim: String },
    NameAktualisieren { name: String },
    MedienBereit,
    /// Traegt die eigene Sitzungs-Referenz; die Autoritaet wendet das Flag
    /// auf den aufrufenden Teilnehmer an und loggt Abweichungen als No-Op
    MedienAktiv { sitzung: SitzungsId },
    ObjektAnheften { objekt: ObjektId },
    ObjektLoesen { objekt: ObjektId },
    ChatAnhaengen { inhalt: String },

    // --- Server -> Client ---
    Beigetreten(BeitrittsBestaetigung),
    Delta(RaumDelta),
    Fehler(FehlerAntwort),

    // --- Server -> Client: Lobby-Discovery ---
    Lobby(LobbyEreignis),

    // --- Keepalive ---
    Ping(Ping),
    Pong(Pong),
}

/// Nachrichten-Umschlag mit Request-ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaumNachricht {
    pub request_id: u32,
    pub payload: RaumPayload,
}

impl RaumNachricht {
    /// Erstellt eine neue Nachricht
    pub fn new(request_id: u32, payload: RaumPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine Fehlerantwort
    pub fn fehler(request_id: u32, code: FehlerCode, nachricht: impl Into<String>) -> Self {
        Self::new(
            request_id,
            RaumPayload::Fehler(FehlerAntwort {
                code,
                nachricht: nachricht.into(),
            }),
        )
    }

    /// Erstellt ein Delta-Broadcast (Deltas tragen keine Request-ID)
    pub fn delta(delta: RaumDelta) -> Self {
        Self::new(0, RaumPayload::Delta(delta))
    }

    /// Erstellt einen Ping
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(request_id, RaumPayload::Ping(Ping { timestamp_ms }))
    }

    /// Erstellt ein Pong auf den gegebenen Ping
    pub fn pong(request_id: u32, ping_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            RaumPayload::Pong(Pong {
                ping_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt einen geordneten Abschied
    pub fn abschied(grund: impl Into<String>) -> Self {
        Self::new(
            0,
            RaumPayload::Abschied {
                grund: Some(grund.into()),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nachricht_serde_round_trip() {
        let msg = RaumNachricht::new(
            7,
            RaumPayload::PositionAktualisieren {
                x: 1.5,
                y: -2.0,
                anim: "laufen".into(),
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        let zurueck: RaumNachricht = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck.request_id, 7);
        assert!(matches!(
            zurueck.payload,
            RaumPayload::PositionAktualisieren { .. }
        ));
    }

    #[test]
    fn fehler_konstruktor() {
        let msg = RaumNachricht::fehler(3, FehlerCode::RaumVoll, "Kapazitaet erreicht");
        match msg.payload {
            RaumPayload::Fehler(f) => {
                assert_eq!(f.code, FehlerCode::RaumVoll);
                assert_eq!(f.nachricht, "Kapazitaet erreicht");
            }
            other => panic!("Erwartet Fehler, erhalten: {other:?}"),
        }
    }

    #[test]
    fn schliess_code_abnormal() {
        assert!(SchliessCode::Abbruch.ist_abnormal());
        assert!(!SchliessCode::Normal.ist_abnormal());
        assert!(!SchliessCode::ServerSchliessung.ist_abnormal());
    }

    #[test]
    fn unit_variante_als_string() {
        let json = r#"{"request_id":1,"payload":"MedienBereit"}"#;
        let msg: RaumNachricht = serde_json::from_str(json).unwrap();
        assert!(matches!(msg.payload, RaumPayload::MedienBereit));
    }

    #[test]
    fn unbekannte_payload_ist_deserialisierungs_fehler() {
        // Der Verbindungs-Task loggt und verwirft solche Frames,
        // die Verbindung bleibt bestehen
        let json = r#"{"request_id":1,"payload":{"VoellisUnbekannt":{}}}"#;
        let ergebnis: std::result::Result<RaumNachricht, _> = serde_json::from_str(json);
        assert!(ergebnis.is_err());
    }
}
