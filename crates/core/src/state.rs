//! Replizierter Raumzustand
//!
//! Der Autoritaetsprozess besitzt den Zustand exklusiv und mutiert ihn nur
//! ueber die Befehls-Pipeline; Clients halten ein schreibgeschuetztes
//! Replikat. Beide Seiten wenden Deltas ueber denselben Code-Pfad
//! ([`RaumZustand::anwenden`]) an – Konvergenz folgt aus der Konstruktion,
//! nicht aus Disziplin.
//!
//! `BTreeMap`/`BTreeSet` statt HashMap: deterministische Serialisierung,
//! damit zwei konvergierte Replikate byte-identisch serialisieren.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delta::RaumDelta;
use crate::types::{FlaechenId, ObjektId, SitzungsId};

/// Kapazitaet des Chat-Logs (FIFO-Verdraengung am Limit)
pub const CHAT_KAPAZITAET: usize = 100;

// ---------------------------------------------------------------------------
// Teilnehmer
// ---------------------------------------------------------------------------

/// Ein admittierter Teilnehmer innerhalb eines Raums
///
/// Existiert im Roster genau solange die zugrundeliegende Verbindung
/// admittiert ist; die Entfernung erfolgt synchron mit dem
/// Verbindungsverlust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teilnehmer {
    pub sitzung: SitzungsId,
    /// Anzeigename, anfaenglich leer
    pub name: String,
    pub x: f32,
    pub y: f32,
    /// Animations-/Zustands-Tag
    pub anim: String,
    /// Medien-Opt-in (`readyForMedia`)
    pub medien_bereit: bool,
    /// Medien aktiv (`mediaActive`)
    pub medien_aktiv: bool,
}

impl Teilnehmer {
    /// Erstellt einen frischen Teilnehmer an der Startposition
    pub fn neu(sitzung: SitzungsId) -> Self {
        Self {
            sitzung,
            name: String::new(),
            x: 0.0,
            y: 0.0,
            anim: String::new(),
            medien_bereit: false,
            medien_aktiv: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Geteilte Objekte
// ---------------------------------------------------------------------------

/// Art eines geteilten Objekts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjektArt {
    /// Geteiltes Terminal (unbegrenzte Anheftungen)
    Terminal,
    /// Zeichentafel mit generierter Kollaborationsflaechen-ID
    Tafel { flaeche: FlaechenId },
}

/// Ein geteiltes interaktives Objekt
///
/// Die Objektmenge steht bei Raumerstellung fest und wird danach weder
/// erweitert noch verkleinert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeteiltesObjekt {
    pub id: ObjektId,
    pub art: ObjektArt,
    /// Aktuell angeheftete Teilnehmer
    pub angeheftet: BTreeSet<SitzungsId>,
}

impl GeteiltesObjekt {
    pub fn neu(id: ObjektId, art: ObjektArt) -> Self {
        Self {
            id,
            art,
            angeheftet: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat-Log
// ---------------------------------------------------------------------------

/// Ein Chat-Eintrag, unveraenderlich nach dem Anhaengen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEintrag {
    pub autor: String,
    pub inhalt: String,
    pub zeitpunkt: DateTime<Utc>,
}

impl ChatEintrag {
    pub fn neu(autor: impl Into<String>, inhalt: impl Into<String>) -> Self {
        Self {
            autor: autor.into(),
            inhalt: inhalt.into(),
            zeitpunkt: Utc::now(),
        }
    }
}

/// Begrenztes, geordnetes Chat-Log mit FIFO-Verdraengung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLog {
    eintraege: VecDeque<ChatEintrag>,
    kapazitaet: usize,
}

impl ChatLog {
    /// Erstellt ein leeres Log mit Standardkapazitaet
    pub fn neu() -> Self {
        Self::mit_kapazitaet(CHAT_KAPAZITAET)
    }

    /// Erstellt ein leeres Log mit eigener Kapazitaet (fuer Tests)
    pub fn mit_kapazitaet(kapazitaet: usize) -> Self {
        Self {
            eintraege: VecDeque::with_capacity(kapazitaet),
            kapazitaet,
        }
    }

    /// Haengt einen Eintrag an; verdraengt zuvor den aeltesten falls voll
    pub fn anhaengen(&mut self, eintrag: ChatEintrag) {
        if self.eintraege.len() >= self.kapazitaet {
            self.eintraege.pop_front();
        }
        self.eintraege.push_back(eintrag);
    }

    /// Eintraege in Anhaenge-Reihenfolge (aeltester zuerst)
    pub fn eintraege(&self) -> impl Iterator<Item = &ChatEintrag> {
        self.eintraege.iter()
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// RaumZustand
// ---------------------------------------------------------------------------

/// Der vollstaendige replizierte Zustand eines Raums
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RaumZustand {
    pub teilnehmer: BTreeMap<SitzungsId, Teilnehmer>,
    pub objekte: BTreeMap<ObjektId, GeteiltesObjekt>,
    pub chat: ChatLog,
}

impl RaumZustand {
    /// Erstellt einen leeren Zustand ohne Objekte
    pub fn neu() -> Self {
        Self::default()
    }

    /// Wendet ein einzelnes Delta an
    ///
    /// Deltas fuer unbekannte Sitzungen oder Objekte sind stille No-Ops:
    /// sie entstehen wenn eine Mutation mit einem Abgang gerast hat und
    /// duerfen ein Replikat nie zum Absturz bringen.
    pub fn anwenden(&mut self, delta: &RaumDelta) {
        match delta {
            RaumDelta::TeilnehmerHinzugefuegt { teilnehmer } => {
                self.teilnehmer
                    .insert(teilnehmer.sitzung, teilnehmer.clone());
            }
            RaumDelta::TeilnehmerEntfernt { sitzung } => {
                self.teilnehmer.remove(sitzung);
            }
            RaumDelta::PositionGeaendert { sitzung, x, y, anim } => {
                if let Some(t) = self.teilnehmer.get_mut(sitzung) {
                    t.x = *x;
                    t.y = *y;
                    t.anim = anim.clone();
                }
            }
            RaumDelta::NameGeaendert { sitzung, name } => {
                if let Some(t) = self.teilnehmer.get_mut(sitzung) {
                    t.name = name.clone();
                }
            }
            RaumDelta::MedienBereitGeaendert { sitzung, bereit } => {
                if let Some(t) = self.teilnehmer.get_mut(sitzung) {
                    t.medien_bereit = *bereit;
                }
            }
            RaumDelta::MedienAktivGeaendert { sitzung, aktiv } => {
                if let Some(t) = self.teilnehmer.get_mut(sitzung) {
                    t.medien_aktiv = *aktiv;
                }
            }
            RaumDelta::ObjektAngeheftet { objekt, sitzung } => {
                if let Some(o) = self.objekte.get_mut(objekt) {
                    o.angeheftet.insert(*sitzung);
                }
            }
            RaumDelta::ObjektGeloest { objekt, sitzung } => {
                if let Some(o) = self.objekte.get_mut(objekt) {
                    o.angeheftet.remove(sitzung);
                }
            }
            RaumDelta::ChatAngehaengt { eintrag } => {
                self.chat.anhaengen(eintrag.clone());
            }
        }
    }

    /// Wendet eine Delta-Folge in Reihenfolge an
    pub fn alle_anwenden<'a>(&mut self, deltas: impl IntoIterator<Item = &'a RaumDelta>) {
        for delta in deltas {
            self.anwenden(delta);
        }
    }

    /// Serialisiert den Zustand kanonisch (fuer Konvergenz-Vergleiche)
    pub fn kanonische_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("RaumZustand ist immer serialisierbar")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn zustand_mit_teilnehmer(sitzung: SitzungsId) -> RaumZustand {
        let mut z = RaumZustand::neu();
        z.anwenden(&RaumDelta::TeilnehmerHinzugefuegt {
            teilnehmer: Teilnehmer::neu(sitzung),
        });
        z
    }

    #[test]
    fn teilnehmer_hinzufuegen_und_entfernen() {
        let sid = SitzungsId::new();
        let mut z = zustand_mit_teilnehmer(sid);
        assert_eq!(z.teilnehmer.len(), 1);

        z.anwenden(&RaumDelta::TeilnehmerEntfernt { sitzung: sid });
        assert!(z.teilnehmer.is_empty());
    }

    #[test]
    fn position_und_name_aendern() {
        let sid = SitzungsId::new();
        let mut z = zustand_mit_teilnehmer(sid);

        z.anwenden(&RaumDelta::PositionGeaendert {
            sitzung: sid,
            x: 3.0,
            y: 4.0,
            anim: "laufen".into(),
        });
        z.anwenden(&RaumDelta::NameGeaendert {
            sitzung: sid,
            name: "anna".into(),
        });

        let t = &z.teilnehmer[&sid];
        assert_eq!((t.x, t.y), (3.0, 4.0));
        assert_eq!(t.anim, "laufen");
        assert_eq!(t.name, "anna");
    }

    #[test]
    fn delta_fuer_unbekannte_sitzung_ist_no_op() {
        let mut z = RaumZustand::neu();
        z.anwenden(&RaumDelta::NameGeaendert {
            sitzung: SitzungsId::new(),
            name: "geist".into(),
        });
        assert!(z.teilnehmer.is_empty());
    }

    #[test]
    fn objekt_anheften_ist_idempotent() {
        let sid = SitzungsId::new();
        let oid = ObjektId::terminal(0);
        let mut z = zustand_mit_teilnehmer(sid);
        z.objekte.insert(
            oid.clone(),
            GeteiltesObjekt::neu(oid.clone(), ObjektArt::Terminal),
        );

        let delta = RaumDelta::ObjektAngeheftet {
            objekt: oid.clone(),
            sitzung: sid,
        };
        z.anwenden(&delta);
        z.anwenden(&delta);
        assert_eq!(z.objekte[&oid].angeheftet.len(), 1);

        // Loesen eines Nicht-Mitglieds ist ein No-Op
        z.anwenden(&RaumDelta::ObjektGeloest {
            objekt: oid.clone(),
            sitzung: SitzungsId::new(),
        });
        assert_eq!(z.objekte[&oid].angeheftet.len(), 1);
    }

    #[test]
    fn chat_log_fifo_verdraengung() {
        let mut log = ChatLog::neu();
        for i in 1..=101 {
            log.anhaengen(ChatEintrag::neu("anna", format!("nachricht {i}")));
        }

        assert_eq!(log.len(), 100);
        let inhalte: Vec<&str> = log.eintraege().map(|e| e.inhalt.as_str()).collect();
        assert_eq!(inhalte.first(), Some(&"nachricht 2"), "Eintrag 1 verdraengt");
        assert_eq!(inhalte.last(), Some(&"nachricht 101"));
        // Reihenfolge 2..=101 lueckenlos
        for (idx, inhalt) in inhalte.iter().enumerate() {
            assert_eq!(*inhalt, format!("nachricht {}", idx + 2));
        }
    }

    #[test]
    fn gleiche_delta_folge_ergibt_byte_identischen_zustand() {
        let sid = SitzungsId::new();
        let deltas = vec![
            RaumDelta::TeilnehmerHinzugefuegt {
                teilnehmer: Teilnehmer::neu(sid),
            },
            RaumDelta::PositionGeaendert {
                sitzung: sid,
                x: 1.0,
                y: 2.0,
                anim: "stehen".into(),
            },
            RaumDelta::ChatAngehaengt {
                eintrag: ChatEintrag::neu("anna", "hallo"),
            },
        ];

        let mut a = RaumZustand::neu();
        let mut b = RaumZustand::neu();
        a.alle_anwenden(&deltas);
        b.alle_anwenden(&deltas);

        assert_eq!(a.kanonische_bytes(), b.kanonische_bytes());
    }
}
