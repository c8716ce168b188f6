//! Raum-Task – serieller Eigentuemer eines Raumzustands
//!
//! Jeder Raum laeuft als eigener Task mit einer Auftrags-Queue. Beitritte,
//! Befehle und Abgaenge werden strikt in Ankunftsreihenfolge abgearbeitet;
//! dadurch ist die Kapazitaetspruefung atomar mit der Admission und ein
//! Abgang ist garantiert vor einem Neubeitritt derselben Verbindung
//! verarbeitet. Verschiedene Raeume laufen unabhaengig voneinander.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use werkraum_core::delta::RaumDelta;
use werkraum_core::state::{
    ChatLog, GeteiltesObjekt, ObjektArt, RaumZustand, Teilnehmer, CHAT_KAPAZITAET,
};
use werkraum_core::types::{FlaechenId, ObjektId, RaumId, SitzungsId};
use werkraum_protocol::{BeitrittsBestaetigung, RaumMetadaten, RaumNachricht};

use crate::befehle::{self, Befehl};
use crate::error::{RaumError, RaumResult};
use crate::flaechen::FlaechenAllokator;
use crate::verlauf::VerlaufSpeicher;
use crate::versand::RaumVersand;
use crate::zugang;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Auftrags-Queue eines Raums
const AUFTRAGS_QUEUE_GROESSE: usize = 256;

/// Zeitlimit fuer den Verlaufs-Abruf bei Raum-Initialisierung
const VERLAUF_ABRUF_TIMEOUT: Duration = Duration::from_secs(2);

/// Standard-Kapazitaet eines Raums
pub const STANDARD_KAPAZITAET: u32 = 16;

/// Standard-Anzahl geteilter Terminals pro Raum
pub const STANDARD_TERMINALS: usize = 5;

/// Standard-Anzahl Tafeln pro Raum
pub const STANDARD_TAFELN: usize = 3;

// ---------------------------------------------------------------------------
// Optionen & Auftraege
// ---------------------------------------------------------------------------

/// Unveraenderliche Optionen eines Raums, festgelegt bei Erstellung
#[derive(Debug, Clone)]
pub struct RaumOptionen {
    pub name: String,
    pub beschreibung: Option<String>,
    /// Argon2-PHC-Hash des Zugangsgeheimnisses (None = offen)
    pub geheimnis_hash: Option<String>,
    /// Raum aufloesen sobald der letzte Teilnehmer geht
    pub auto_aufloesen: bool,
    pub kapazitaet: u32,
    pub terminals: usize,
    pub tafeln: usize,
}

impl Default for RaumOptionen {
    fn default() -> Self {
        Self {
            name: String::new(),
            beschreibung: None,
            geheimnis_hash: None,
            auto_aufloesen: true,
            kapazitaet: STANDARD_KAPAZITAET,
            terminals: STANDARD_TERMINALS,
            tafeln: STANDARD_TAFELN,
        }
    }
}

/// Erfolgreiche Admission: Bestaetigung plus Empfangs-Queue fuer Deltas
pub struct BeitrittsErfolg {
    pub bestaetigung: BeitrittsBestaetigung,
    pub empfang: mpsc::Receiver<RaumNachricht>,
}

/// Ein Auftrag an den Raum-Task
pub enum RaumAuftrag {
    Beitritt {
        geheimnis: Option<String>,
        name: String,
        antwort: oneshot::Sender<RaumResult<BeitrittsErfolg>>,
    },
    Befehl {
        sitzung: SitzungsId,
        befehl: Befehl,
    },
    Verlassen {
        sitzung: SitzungsId,
    },
    Herunterfahren {
        antwort: Option<oneshot::Sender<()>>,
    },
}

/// Lebenszyklus-Ereignisse eines Raums an die Registry
#[derive(Debug)]
pub enum RaumEreignis {
    /// Teilnehmerzahl hat sich geaendert (Lobby-Aktualisierung)
    TeilnehmerZahlGeaendert { raum_id: RaumId },
    /// Raum wurde aufgeloest, Handle kann entfernt werden
    Aufgeloest { raum_id: RaumId },
}

// ---------------------------------------------------------------------------
// RaumHandle
// ---------------------------------------------------------------------------

/// Handle auf einen laufenden Raum-Task
///
/// Clone ist billig; alle Clones sprechen mit demselben Task.
#[derive(Clone)]
pub struct RaumHandle {
    pub raum_id: RaumId,
    pub name: String,
    pub beschreibung: Option<String>,
    pub hat_geheimnis: bool,
    pub kapazitaet: u32,
    auftrag_tx: mpsc::Sender<RaumAuftrag>,
    teilnehmer_anzahl: Arc<AtomicU32>,
}

impl RaumHandle {
    /// Beantragt Admission in den Raum
    pub async fn beitreten(
        &self,
        geheimnis: Option<String>,
        name: String,
    ) -> RaumResult<BeitrittsErfolg> {
        let (tx, rx) = oneshot::channel();
        self.auftrag_tx
            .send(RaumAuftrag::Beitritt {
                geheimnis,
                name,
                antwort: tx,
            })
            .await
            .map_err(|_| RaumError::RaumAufgeloest)?;
        rx.await.map_err(|_| RaumError::RaumAufgeloest)?
    }

    /// Reiht einen Befehl in die Auftrags-Queue ein
    pub async fn befehl(&self, sitzung: SitzungsId, befehl: Befehl) -> RaumResult<()> {
        self.auftrag_tx
            .send(RaumAuftrag::Befehl { sitzung, befehl })
            .await
            .map_err(|_| RaumError::RaumAufgeloest)
    }

    /// Meldet den Abgang einer Sitzung
    ///
    /// Ein bereits aufgeloester Raum ist kein Fehler.
    pub async fn verlassen(&self, sitzung: SitzungsId) {
        let _ = self
            .auftrag_tx
            .send(RaumAuftrag::Verlassen { sitzung })
            .await;
    }

    /// Faehrt den Raum geordnet herunter und wartet auf die Bestaetigung
    pub async fn herunterfahren(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .auftrag_tx
            .send(RaumAuftrag::Herunterfahren { antwort: Some(tx) })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Aktuelle Teilnehmerzahl (fuer die Lobby, leicht nachlaufend)
    pub fn teilnehmer_anzahl(&self) -> u32 {
        self.teilnehmer_anzahl.load(Ordering::Relaxed)
    }

    /// Metadaten fuer die Lobby-Auflistung
    pub fn metadaten(&self) -> RaumMetadaten {
        RaumMetadaten {
            raum_id: self.raum_id,
            name: self.name.clone(),
            beschreibung: self.beschreibung.clone(),
            hat_geheimnis: self.hat_geheimnis,
            teilnehmer_anzahl: self.teilnehmer_anzahl(),
            kapazitaet: self.kapazitaet,
        }
    }
}

// ---------------------------------------------------------------------------
// Raum-Task
// ---------------------------------------------------------------------------

struct Raum<V: VerlaufSpeicher> {
    raum_id: RaumId,
    optionen: RaumOptionen,
    zustand: RaumZustand,
    versand: RaumVersand,
    flaechen: Arc<FlaechenAllokator>,
    reservierte_flaechen: Vec<FlaechenId>,
    verlauf: Arc<V>,
    ereignis_tx: mpsc::UnboundedSender<RaumEreignis>,
    teilnehmer_anzahl: Arc<AtomicU32>,
}

/// Startet einen neuen Raum-Task und gibt das Handle zurueck
///
/// Die Objektmenge (Terminals und Tafeln) wird hier festgelegt und danach
/// nie wieder veraendert; Tafeln erhalten ihre Flaechen-IDs aus dem
/// prozessweiten Allokator.
pub fn starten<V: VerlaufSpeicher>(
    raum_id: RaumId,
    optionen: RaumOptionen,
    flaechen: Arc<FlaechenAllokator>,
    verlauf: Arc<V>,
    ereignis_tx: mpsc::UnboundedSender<RaumEreignis>,
) -> RaumHandle {
    let (auftrag_tx, auftrag_rx) = mpsc::channel(AUFTRAGS_QUEUE_GROESSE);
    let teilnehmer_anzahl = Arc::new(AtomicU32::new(0));

    let mut zustand = RaumZustand::neu();
    let mut reservierte_flaechen = Vec::with_capacity(optionen.tafeln);
    for n in 0..optionen.terminals {
        let id = ObjektId::terminal(n);
        zustand
            .objekte
            .insert(id.clone(), GeteiltesObjekt::neu(id, ObjektArt::Terminal));
    }
    for n in 0..optionen.tafeln {
        let flaeche = flaechen.reservieren();
        reservierte_flaechen.push(flaeche.clone());
        let id = ObjektId::tafel(n);
        zustand.objekte.insert(
            id.clone(),
            GeteiltesObjekt::neu(id, ObjektArt::Tafel { flaeche }),
        );
    }

    let handle = RaumHandle {
        raum_id,
        name: optionen.name.clone(),
        beschreibung: optionen.beschreibung.clone(),
        hat_geheimnis: optionen.geheimnis_hash.is_some(),
        kapazitaet: optionen.kapazitaet,
        auftrag_tx,
        teilnehmer_anzahl: Arc::clone(&teilnehmer_anzahl),
    };

    let raum = Raum {
        raum_id,
        optionen,
        zustand,
        versand: RaumVersand::neu(),
        flaechen,
        reservierte_flaechen,
        verlauf,
        ereignis_tx,
        teilnehmer_anzahl,
    };

    tokio::spawn(raum.betreiben(auftrag_rx));

    handle
}

impl<V: VerlaufSpeicher> Raum<V> {
    async fn betreiben(mut self, mut auftraege: mpsc::Receiver<RaumAuftrag>) {
        self.verlauf_laden().await;
        tracing::info!(raum_id = %self.raum_id, name = %self.optionen.name, "Raum geoeffnet");

        while let Some(auftrag) = auftraege.recv().await {
            match auftrag {
                RaumAuftrag::Beitritt {
                    geheimnis,
                    name,
                    antwort,
                } => {
                    let ergebnis = self.beitritt_verarbeiten(geheimnis, name);
                    let _ = antwort.send(ergebnis);
                }
                RaumAuftrag::Befehl { sitzung, befehl } => {
                    self.befehl_verarbeiten(sitzung, befehl);
                }
                RaumAuftrag::Verlassen { sitzung } => {
                    self.verlassen_verarbeiten(sitzung);
                    if self.optionen.auto_aufloesen && self.zustand.teilnehmer.is_empty() {
                        tracing::info!(raum_id = %self.raum_id, "Raum leer, loese auf");
                        break;
                    }
                }
                RaumAuftrag::Herunterfahren { antwort } => {
                    self.versand
                        .an_alle_senden(RaumNachricht::abschied("Raum wird geschlossen"));
                    if let Some(tx) = antwort {
                        let _ = tx.send(());
                    }
                    break;
                }
            }
        }

        self.aufraeumen().await;
    }

    /// Laedt den juengsten Chat-Verlauf in den frischen Zustand
    ///
    /// Ein nicht erreichbarer Verlaufs-Speicher oeffnet den Raum trotzdem,
    /// nur eben mit leerem Log.
    async fn verlauf_laden(&mut self) {
        let abruf = self.verlauf.letzte_eintraege(self.raum_id, CHAT_KAPAZITAET);
        match tokio::time::timeout(VERLAUF_ABRUF_TIMEOUT, abruf).await {
            Ok(Ok(eintraege)) if !eintraege.is_empty() => {
                let mut log = ChatLog::neu();
                for eintrag in eintraege {
                    log.anhaengen(eintrag);
                }
                tracing::debug!(raum_id = %self.raum_id, eintraege = log.len(), "Chat-Verlauf geladen");
                self.zustand.chat = log;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(raum_id = %self.raum_id, fehler = %e, "Verlaufs-Abruf fehlgeschlagen, starte mit leerem Log");
            }
            Err(_) => {
                tracing::warn!(raum_id = %self.raum_id, "Verlaufs-Abruf Zeitlimit, starte mit leerem Log");
            }
        }
    }

    fn beitritt_verarbeiten(
        &mut self,
        geheimnis: Option<String>,
        name: String,
    ) -> RaumResult<BeitrittsErfolg> {
        // Kapazitaet zuerst: die Pruefung ist atomar mit der Admission,
        // weil dieser Task der einzige Schreiber des Rosters ist
        let belegt = self.zustand.teilnehmer.len() as u32;
        if belegt >= self.optionen.kapazitaet {
            return Err(RaumError::RaumVoll(self.optionen.kapazitaet));
        }

        match (&self.optionen.geheimnis_hash, &geheimnis) {
            (Some(hash), Some(angegeben)) => {
                if !zugang::geheimnis_verifizieren(angegeben, hash)? {
                    return Err(RaumError::GeheimnisFalsch);
                }
            }
            (Some(_), None) => return Err(RaumError::GeheimnisErforderlich),
            (None, _) => {}
        }

        let sitzung = SitzungsId::new();

        // Schnappschuss vor der eigenen Aufnahme; das eigene
        // TeilnehmerHinzugefuegt folgt als erstes Delta danach
        let schnappschuss = self.zustand.clone();
        let empfang = self.versand.registrieren(sitzung);

        let mut teilnehmer = Teilnehmer::neu(sitzung);
        teilnehmer.name = name;
        self.deltas_verteilen(vec![RaumDelta::TeilnehmerHinzugefuegt { teilnehmer }]);

        self.teilnehmerzahl_melden();
        tracing::info!(raum_id = %self.raum_id, sitzung = %sitzung, "Teilnehmer admittiert");

        Ok(BeitrittsErfolg {
            bestaetigung: BeitrittsBestaetigung {
                raum_id: self.raum_id,
                sitzung,
                schnappschuss,
            },
            empfang,
        })
    }

    fn befehl_verarbeiten(&mut self, sitzung: SitzungsId, befehl: Befehl) {
        let deltas = befehle::ausfuehren(&mut self.zustand, sitzung, befehl);

        // Chat-Eintraege fire-and-forget persistieren; ein Fehler des
        // Speichers haelt den Raum nicht auf
        for delta in &deltas {
            if let RaumDelta::ChatAngehaengt { eintrag } = delta {
                let verlauf = Arc::clone(&self.verlauf);
                let raum_id = self.raum_id;
                let eintrag = eintrag.clone();
                tokio::spawn(async move {
                    if let Err(e) = verlauf.eintrag_speichern(raum_id, eintrag).await {
                        tracing::warn!(raum_id = %raum_id, fehler = %e, "Chat-Eintrag nicht persistiert");
                    }
                });
            }
        }

        self.verteilen(deltas);
    }

    fn verlassen_verarbeiten(&mut self, sitzung: SitzungsId) {
        if !self.zustand.teilnehmer.contains_key(&sitzung) {
            return;
        }

        // Der Abgehende bekommt keine eigenen Abgangs-Deltas mehr
        self.versand.entfernen(&sitzung);

        // Erst alle Anheftungen loesen, dann den Teilnehmer entfernen
        let mut deltas: Vec<RaumDelta> = self
            .zustand
            .objekte
            .values()
            .filter(|o| o.angeheftet.contains(&sitzung))
            .map(|o| RaumDelta::ObjektGeloest {
                objekt: o.id.clone(),
                sitzung,
            })
            .collect();
        deltas.push(RaumDelta::TeilnehmerEntfernt { sitzung });

        self.deltas_verteilen(deltas);
        self.teilnehmerzahl_melden();
        tracing::info!(raum_id = %self.raum_id, sitzung = %sitzung, "Teilnehmer abgegangen");
    }

    /// Wendet Deltas auf den autoritativen Zustand an und verteilt sie
    fn deltas_verteilen(&mut self, deltas: Vec<RaumDelta>) {
        self.zustand.alle_anwenden(&deltas);
        self.verteilen(deltas);
    }

    /// Verteilt bereits angewendete Deltas in Mutationsreihenfolge
    fn verteilen(&self, deltas: Vec<RaumDelta>) {
        for delta in deltas {
            self.versand.an_alle_senden(RaumNachricht::delta(delta));
        }
    }

    fn teilnehmerzahl_melden(&self) {
        self.teilnehmer_anzahl
            .store(self.zustand.teilnehmer.len() as u32, Ordering::Relaxed);
        let _ = self.ereignis_tx.send(RaumEreignis::TeilnehmerZahlGeaendert {
            raum_id: self.raum_id,
        });
    }

    async fn aufraeumen(self) {
        for flaeche in &self.reservierte_flaechen {
            self.flaechen.freigeben(flaeche);
        }
        if self.optionen.auto_aufloesen {
            if let Err(e) = self.verlauf.raum_aufraeumen(self.raum_id).await {
                tracing::warn!(raum_id = %self.raum_id, fehler = %e, "Verlauf nicht aufgeraeumt");
            }
        }
        let _ = self.ereignis_tx.send(RaumEreignis::Aufgeloest {
            raum_id: self.raum_id,
        });
        tracing::info!(raum_id = %self.raum_id, "Raum aufgeloest");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
