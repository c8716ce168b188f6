//! Schreibgeschuetztes Zustands-Replikat des Clients
//!
//! Haelt den zuletzt bekannten Raumzustand und wendet eingehende Deltas
//! ueber denselben Code-Pfad an wie die Autoritaet. Praesenz-relevante
//! Aenderungen (Teilnehmer kommen und gehen, Medien-Flags) werden als
//! [`PraesenzEreignis`] weiterverteilt, damit der Medien-Mesh-Manager
//! darauf reagieren kann. Ereignisse ueber die eigene Sitzung werden
//! nicht verteilt.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use werkraum_core::delta::RaumDelta;
use werkraum_core::state::{RaumZustand, Teilnehmer};
use werkraum_core::types::SitzungsId;

/// Kapazitaet des Praesenz-Broadcast-Kanals
const PRAESENZ_QUEUE_GROESSE: usize = 64;

/// Praesenz-Aenderung eines anderen Teilnehmers
#[derive(Debug, Clone)]
pub enum PraesenzEreignis {
    TeilnehmerHinzugefuegt { teilnehmer: Teilnehmer },
    TeilnehmerEntfernt { sitzung: SitzungsId },
    MedienBereitGeaendert { sitzung: SitzungsId, bereit: bool },
    MedienAktivGeaendert { sitzung: SitzungsId, aktiv: bool },
}

/// Das lokale Replikat des Raumzustands
///
/// Thread-safe; Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct Replik {
    inner: Arc<ReplikInner>,
}

struct ReplikInner {
    zustand: RwLock<RaumZustand>,
    eigene_sitzung: RwLock<Option<SitzungsId>>,
    praesenz_tx: broadcast::Sender<PraesenzEreignis>,
}

impl Replik {
    /// Erstellt ein leeres Replikat
    pub fn neu() -> Self {
        let (praesenz_tx, _) = broadcast::channel(PRAESENZ_QUEUE_GROESSE);
        Self {
            inner: Arc::new(ReplikInner {
                zustand: RwLock::new(RaumZustand::neu()),
                eigene_sitzung: RwLock::new(None),
                praesenz_tx,
            }),
        }
    }

    /// Abonniert Praesenz-Ereignisse
    pub fn praesenz_abonnieren(&self) -> broadcast::Receiver<PraesenzEreignis> {
        self.inner.praesenz_tx.subscribe()
    }

    /// Die eigene Sitzungs-ID, falls synchronisiert
    pub fn eigene_sitzung(&self) -> Option<SitzungsId> {
        *self.inner.eigene_sitzung.read()
    }

    /// Ersetzt das Replikat durch den Admission-Schnappschuss
    ///
    /// Alle bereits anwesenden Teilnehmer werden als Hinzugefuegt-Ereignis
    /// gemeldet, damit der Mesh-Manager sie nicht verpasst.
    pub fn schnappschuss_setzen(&self, sitzung: SitzungsId, schnappschuss: RaumZustand) {
        *self.inner.eigene_sitzung.write() = Some(sitzung);
        {
            let mut zustand = self.inner.zustand.write();
            *zustand = schnappschuss;
        }
        let zustand = self.inner.zustand.read();
        for teilnehmer in zustand.teilnehmer.values() {
            if teilnehmer.sitzung != sitzung {
                let _ = self.inner.praesenz_tx.send(PraesenzEreignis::TeilnehmerHinzugefuegt {
                    teilnehmer: teilnehmer.clone(),
                });
            }
        }
    }

    /// Wendet ein Delta der Autoritaet an und meldet Praesenz-Aenderungen
    pub fn anwenden(&self, delta: &RaumDelta) {
        self.inner.zustand.write().anwenden(delta);

        let eigene = self.eigene_sitzung();
        let betrifft_fremde = delta.sitzung().map(|s| Some(s) != eigene).unwrap_or(false);
        if !betrifft_fremde {
            return;
        }

        let ereignis = match delta {
            RaumDelta::TeilnehmerHinzugefuegt { teilnehmer } => {
                Some(PraesenzEreignis::TeilnehmerHinzugefuegt {
                    teilnehmer: teilnehmer.clone(),
                })
            }
            RaumDelta::TeilnehmerEntfernt { sitzung } => {
                Some(PraesenzEreignis::TeilnehmerEntfernt { sitzung: *sitzung })
            }
            RaumDelta::MedienBereitGeaendert { sitzung, bereit } => {
                Some(PraesenzEreignis::MedienBereitGeaendert {
                    sitzung: *sitzung,
                    bereit: *bereit,
                })
            }
            RaumDelta::MedienAktivGeaendert { sitzung, aktiv } => {
                Some(PraesenzEreignis::MedienAktivGeaendert {
                    sitzung: *sitzung,
                    aktiv: *aktiv,
                })
            }
            _ => None,
        };
        if let Some(ereignis) = ereignis {
            let _ = self.inner.praesenz_tx.send(ereignis);
        }
    }

    /// Setzt das Replikat nach einem Verbindungsverlust zurueck
    ///
    /// Alle fremden Teilnehmer werden als Entfernt gemeldet, damit der
    /// Mesh-Manager seine Links schliesst.
    pub fn zuruecksetzen(&self) {
        let eigene = self.eigene_sitzung();
        let fremde: Vec<SitzungsId> = {
            let zustand = self.inner.zustand.read();
            zustand
                .teilnehmer
                .keys()
                .copied()
                .filter(|s| Some(*s) != eigene)
                .collect()
        };
        for sitzung in fremde {
            let _ = self
                .inner
                .praesenz_tx
                .send(PraesenzEreignis::TeilnehmerEntfernt { sitzung });
        }
        *self.inner.zustand.write() = RaumZustand::neu();
        *self.inner.eigene_sitzung.write() = None;
    }

    /// Kopie des aktuellen Zustands
    pub fn zustand(&self) -> RaumZustand {
        self.inner.zustand.read().clone()
    }

    /// Lesezugriff ohne Kopie
    pub fn mit_zustand<R>(&self, f: impl FnOnce(&RaumZustand) -> R) -> R {
        f(&self.inner.zustand.read())
    }
}

impl Default for Replik {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
