//! Befehls-Pipeline – der einzige Mutationspfad des Raumzustands
//!
//! Jeder angenommene Befehl durchlaeuft dieselben Stufen: Urheber pruefen,
//! validieren, in Deltas uebersetzen, Deltas auf den autoritativen Zustand
//! anwenden. Die zurueckgegebenen Deltas werden anschliessend vom Raum-Task
//! in Mutationsreihenfolge an alle Teilnehmer verteilt.
//!
//! Befehle von nicht (mehr) admittierten Sitzungen sind geloggte No-Ops:
//! sie entstehen legitim, wenn ein Befehl mit dem Abgang seines Urhebers
//! gerast hat.

use werkraum_core::delta::RaumDelta;
use werkraum_core::state::{ChatEintrag, RaumZustand};
use werkraum_core::types::{ObjektId, SitzungsId};
use werkraum_protocol::RaumPayload;

/// Ein validierbarer Teilnehmer-Befehl
#[derive(Debug, Clone, PartialEq)]
pub enum Befehl {
    PositionAktualisieren { x: f32, y: f32, anim: String },
    NameAktualisieren { name: String },
    MedienBereit,
    MedienAktiv { sitzung: SitzungsId },
    ObjektAnheften { objekt: ObjektId },
    ObjektLoesen { objekt: ObjektId },
    ChatAnhaengen { inhalt: String },
}

impl Befehl {
    /// Extrahiert einen Befehl aus einer Client-Payload
    ///
    /// Gibt `None` zurueck fuer Payloads die keine Befehle sind
    /// (Sitzungsverwaltung, Keepalive, Server-Nachrichten).
    pub fn aus_payload(payload: &RaumPayload) -> Option<Self> {
        match payload {
            RaumPayload::PositionAktualisieren { x, y, anim } => {
                Some(Self::PositionAktualisieren {
                    x: *x,
                    y: *y,
                    anim: anim.clone(),
                })
            }
            RaumPayload::NameAktualisieren { name } => Some(Self::NameAktualisieren {
                name: name.clone(),
            }),
            RaumPayload::MedienBereit => Some(Self::MedienBereit),
            RaumPayload::MedienAktiv { sitzung } => Some(Self::MedienAktiv { sitzung: *sitzung }),
            RaumPayload::ObjektAnheften { objekt } => Some(Self::ObjektAnheften {
                objekt: objekt.clone(),
            }),
            RaumPayload::ObjektLoesen { objekt } => Some(Self::ObjektLoesen {
                objekt: objekt.clone(),
            }),
            RaumPayload::ChatAnhaengen { inhalt } => Some(Self::ChatAnhaengen {
                inhalt: inhalt.clone(),
            }),
            _ => None,
        }
    }
}

/// Fuehrt einen Befehl gegen den autoritativen Zustand aus
///
/// Uebersetzt den Befehl in null oder mehr Deltas, wendet sie an und gibt
/// sie fuer den Versand zurueck. Ein No-Op (unbekannter Urheber, bereits
/// geltender Zielzustand, unbekanntes Objekt) liefert eine leere Folge.
pub fn ausfuehren(zustand: &mut RaumZustand, sitzung: SitzungsId, befehl: Befehl) -> Vec<RaumDelta> {
    let Some(teilnehmer) = zustand.teilnehmer.get(&sitzung) else {
        tracing::debug!(sitzung = %sitzung, befehl = ?befehl, "Befehl von unbekannter Sitzung verworfen");
        return Vec::new();
    };

    let deltas = match befehl {
        Befehl::PositionAktualisieren { x, y, anim } => {
            vec![RaumDelta::PositionGeaendert { sitzung, x, y, anim }]
        }
        Befehl::NameAktualisieren { name } => {
            vec![RaumDelta::NameGeaendert { sitzung, name }]
        }
        Befehl::MedienBereit => {
            if teilnehmer.medien_bereit {
                Vec::new()
            } else {
                vec![RaumDelta::MedienBereitGeaendert {
                    sitzung,
                    bereit: true,
                }]
            }
        }
        Befehl::MedienAktiv { sitzung: referenz } => {
            // Die Referenz muss den Urheber selbst bezeichnen; Abweichungen
            // werden geloggt und ignoriert statt fremden Zustand zu mutieren
            if referenz != sitzung {
                tracing::warn!(
                    sitzung = %sitzung,
                    referenz = %referenz,
                    "MedienAktiv mit fremder Sitzungs-Referenz verworfen"
                );
                Vec::new()
            } else if teilnehmer.medien_aktiv {
                Vec::new()
            } else {
                vec![RaumDelta::MedienAktivGeaendert {
                    sitzung,
                    aktiv: true,
                }]
            }
        }
        Befehl::ObjektAnheften { objekt } => match zustand.objekte.get(&objekt) {
            None => {
                tracing::debug!(sitzung = %sitzung, objekt = %objekt, "Anheften an unbekanntes Objekt verworfen");
                Vec::new()
            }
            Some(o) if o.angeheftet.contains(&sitzung) => Vec::new(),
            Some(_) => vec![RaumDelta::ObjektAngeheftet { objekt, sitzung }],
        },
        Befehl::ObjektLoesen { objekt } => match zustand.objekte.get(&objekt) {
            None => {
                tracing::debug!(sitzung = %sitzung, objekt = %objekt, "Loesen von unbekanntem Objekt verworfen");
                Vec::new()
            }
            Some(o) if !o.angeheftet.contains(&sitzung) => Vec::new(),
            Some(_) => vec![RaumDelta::ObjektGeloest { objekt, sitzung }],
        },
        Befehl::ChatAnhaengen { inhalt } => {
            vec![RaumDelta::ChatAngehaengt {
                eintrag: ChatEintrag::neu(teilnehmer.name.clone(), inhalt),
            }]
        }
    };

    zustand.alle_anwenden(&deltas);
    deltas
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
