//! Raum-Registry und Lobby-Discovery
//!
//! Die `RaumVerwaltung` haelt die Handles aller lebenden Raeume, erstellt
//! neue Raeume und verteilt Lobby-Ereignisse (Raum erstellt, aufgeloest,
//! Teilnehmerzahl geaendert) an alle Abonnenten.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use werkraum_core::types::RaumId;
use werkraum_protocol::{ErstellAnfrage, LobbyEreignis, RaumMetadaten};

use crate::error::{RaumError, RaumResult};
use crate::flaechen::FlaechenAllokator;
use crate::raum::{self, RaumEreignis, RaumHandle, RaumOptionen};
use crate::verlauf::VerlaufSpeicher;
use crate::zugang;

/// Kapazitaet des Lobby-Broadcast-Kanals
const LOBBY_QUEUE_GROESSE: usize = 64;

/// Serverweite Standardwerte fuer neue Raeume
#[derive(Debug, Clone)]
pub struct RaumStandards {
    pub kapazitaet: u32,
    pub terminals: usize,
    pub tafeln: usize,
}

impl Default for RaumStandards {
    fn default() -> Self {
        Self {
            kapazitaet: raum::STANDARD_KAPAZITAET,
            terminals: raum::STANDARD_TERMINALS,
            tafeln: raum::STANDARD_TAFELN,
        }
    }
}

/// Registry aller lebenden Raeume
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
pub struct RaumVerwaltung<V: VerlaufSpeicher> {
    inner: Arc<VerwaltungInner<V>>,
}

impl<V: VerlaufSpeicher> Clone for RaumVerwaltung<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct VerwaltungInner<V: VerlaufSpeicher> {
    raeume: DashMap<RaumId, RaumHandle>,
    flaechen: Arc<FlaechenAllokator>,
    verlauf: Arc<V>,
    standards: RaumStandards,
    lobby_tx: broadcast::Sender<LobbyEreignis>,
    ereignis_tx: mpsc::UnboundedSender<RaumEreignis>,
}

impl<V: VerlaufSpeicher> RaumVerwaltung<V> {
    /// Erstellt eine neue Verwaltung und startet den Lebenszyklus-Task
    pub fn neu(verlauf: Arc<V>, standards: RaumStandards) -> Self {
        let (lobby_tx, _) = broadcast::channel(LOBBY_QUEUE_GROESSE);
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(VerwaltungInner {
            raeume: DashMap::new(),
            flaechen: Arc::new(FlaechenAllokator::neu()),
            verlauf,
            standards,
            lobby_tx,
            ereignis_tx,
        });

        tokio::spawn(lebenszyklus_betreiben(Arc::downgrade(&inner), ereignis_rx));

        Self { inner }
    }

    /// Erstellt einen neuen Raum und registriert ihn in der Lobby
    pub fn raum_erstellen(&self, anfrage: &ErstellAnfrage) -> RaumResult<RaumHandle> {
        let geheimnis_hash = anfrage
            .geheimnis
            .as_deref()
            .map(zugang::geheimnis_hashen)
            .transpose()?;

        let optionen = RaumOptionen {
            name: anfrage.raum_name.clone(),
            beschreibung: anfrage.beschreibung.clone(),
            geheimnis_hash,
            auto_aufloesen: anfrage.auto_aufloesen,
            kapazitaet: anfrage.kapazitaet.unwrap_or(self.inner.standards.kapazitaet),
            terminals: self.inner.standards.terminals,
            tafeln: self.inner.standards.tafeln,
        };

        let handle = raum::starten(
            RaumId::new(),
            optionen,
            Arc::clone(&self.inner.flaechen),
            Arc::clone(&self.inner.verlauf),
            self.inner.ereignis_tx.clone(),
        );

        self.inner.raeume.insert(handle.raum_id, handle.clone());
        let _ = self
            .inner
            .lobby_tx
            .send(LobbyEreignis::RaumHinzugefuegt(handle.metadaten()));
        tracing::info!(raum_id = %handle.raum_id, name = %handle.name, "Raum erstellt");

        Ok(handle)
    }

    /// Sucht einen Raum in der Registry
    pub fn raum(&self, raum_id: &RaumId) -> RaumResult<RaumHandle> {
        self.inner
            .raeume
            .get(raum_id)
            .map(|eintrag| eintrag.clone())
            .ok_or(RaumError::RaumNichtGefunden(*raum_id))
    }

    /// Metadaten aller lebenden Raeume
    pub fn raum_liste(&self) -> Vec<RaumMetadaten> {
        self.inner
            .raeume
            .iter()
            .map(|eintrag| eintrag.value().metadaten())
            .collect()
    }

    /// Abonniert den Lobby-Ereignisstrom
    pub fn lobby_abonnieren(&self) -> broadcast::Receiver<LobbyEreignis> {
        self.inner.lobby_tx.subscribe()
    }

    /// Anzahl der lebenden Raeume
    pub fn anzahl_raeume(&self) -> usize {
        self.inner.raeume.len()
    }

    /// Zugriff auf den prozessweiten Flaechen-Allokator
    pub fn flaechen(&self) -> &Arc<FlaechenAllokator> {
        &self.inner.flaechen
    }

    /// Faehrt alle Raeume geordnet herunter
    pub async fn herunterfahren(&self) {
        let handles: Vec<RaumHandle> = self
            .inner
            .raeume
            .iter()
            .map(|eintrag| eintrag.value().clone())
            .collect();
        for handle in handles {
            handle.herunterfahren().await;
        }
        tracing::info!("Alle Raeume heruntergefahren");
    }
}

/// Konsumiert Raum-Lebenszyklus-Ereignisse und pflegt Registry und Lobby
async fn lebenszyklus_betreiben<V: VerlaufSpeicher>(
    inner: Weak<VerwaltungInner<V>>,
    mut ereignisse: mpsc::UnboundedReceiver<RaumEreignis>,
) {
    while let Some(ereignis) = ereignisse.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match ereignis {
            RaumEreignis::TeilnehmerZahlGeaendert { raum_id } => {
                if let Some(handle) = inner.raeume.get(&raum_id) {
                    let _ = inner
                        .lobby_tx
                        .send(LobbyEreignis::RaumListeGeaendert(handle.metadaten()));
                }
            }
            RaumEreignis::Aufgeloest { raum_id } => {
                inner.raeume.remove(&raum_id);
                let _ = inner.lobby_tx.send(LobbyEreignis::RaumEntfernt { raum_id });
                tracing::debug!(raum_id = %raum_id, "Raum aus Registry entfernt");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verlauf::NullVerlauf;
    use std::time::Duration;

    fn test_verwaltung() -> RaumVerwaltung<NullVerlauf> {
        RaumVerwaltung::neu(Arc::new(NullVerlauf), RaumStandards::default())
    }

    fn test_anfrage(name: &str) -> ErstellAnfrage {
        ErstellAnfrage {
            raum_name: name.into(),
            beschreibung: None,
            geheimnis: None,
            auto_aufloesen: true,
            kapazitaet: None,
            name: "ersteller".into(),
        }
    }

    #[tokio::test]
    async fn erstellen_und_auffinden() {
        let verwaltung = test_verwaltung();

        let handle = verwaltung
            .raum_erstellen(&test_anfrage("werkstatt"))
            .expect("Erstellen fehlgeschlagen");

        let gefunden = verwaltung.raum(&handle.raum_id).expect("Raum muss auffindbar sein");
        assert_eq!(gefunden.name, "werkstatt");
        assert!(!gefunden.hat_geheimnis);

        let liste = verwaltung.raum_liste();
        assert_eq!(liste.len(), 1);
        assert_eq!(liste[0].kapazitaet, raum::STANDARD_KAPAZITAET);
    }

    #[tokio::test]
    async fn unbekannter_raum_ist_fehler() {
        let verwaltung = test_verwaltung();
        let ergebnis = verwaltung.raum(&RaumId::new());
        assert!(matches!(ergebnis, Err(RaumError::RaumNichtGefunden(_))));
    }

    #[tokio::test]
    async fn lobby_meldet_erstellung_und_teilnehmerzahl() {
        let verwaltung = test_verwaltung();
        let mut lobby = verwaltung.lobby_abonnieren();

        let handle = verwaltung
            .raum_erstellen(&test_anfrage("werkstatt"))
            .expect("Erstellen");

        let ereignis = lobby.recv().await.expect("Lobby-Ereignis erwartet");
        match ereignis {
            LobbyEreignis::RaumHinzugefuegt(meta) => {
                assert_eq!(meta.raum_id, handle.raum_id);
                assert_eq!(meta.teilnehmer_anzahl, 0);
            }
            other => panic!("Erwartet RaumHinzugefuegt, erhalten: {other:?}"),
        }

        let _gast = handle.beitreten(None, "anna".into()).await.expect("Beitritt");
        let ereignis = tokio::time::timeout(Duration::from_secs(1), lobby.recv())
            .await
            .expect("Zeitlimit")
            .expect("Lobby-Ereignis erwartet");
        match ereignis {
            LobbyEreignis::RaumListeGeaendert(meta) => {
                assert_eq!(meta.teilnehmer_anzahl, 1);
            }
            other => panic!("Erwartet RaumListeGeaendert, erhalten: {other:?}"),
        }
    }

    #[tokio::test]
    async fn aufloesung_entfernt_aus_registry() {
        let verwaltung = test_verwaltung();
        let handle = verwaltung
            .raum_erstellen(&test_anfrage("fluechtig"))
            .expect("Erstellen");

        let gast = handle.beitreten(None, "anna".into()).await.expect("Beitritt");
        handle.verlassen(gast.bestaetigung.sitzung).await;

        // Aufloesung laeuft asynchron durch den Lebenszyklus-Task
        let mut versuche = 0;
        while verwaltung.anzahl_raeume() > 0 {
            versuche += 1;
            assert!(versuche < 100, "Raum wurde nicht aus der Registry entfernt");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(verwaltung.raum(&handle.raum_id).is_err());
    }

    #[tokio::test]
    async fn herunterfahren_schliesst_alle_raeume() {
        let verwaltung = test_verwaltung();
        let mut anfrage = test_anfrage("bleibt");
        anfrage.auto_aufloesen = false;

        let a = verwaltung.raum_erstellen(&anfrage).expect("Erstellen a");
        let b = verwaltung.raum_erstellen(&anfrage).expect("Erstellen b");

        verwaltung.herunterfahren().await;

        assert!(a.beitreten(None, "anna".into()).await.is_err());
        assert!(b.beitreten(None, "anna".into()).await.is_err());
    }

    #[tokio::test]
    async fn geheimnis_wird_beim_erstellen_gehasht() {
        let verwaltung = test_verwaltung();
        let mut anfrage = test_anfrage("geschuetzt");
        anfrage.geheimnis = Some("parole".into());
        anfrage.auto_aufloesen = false;

        let handle = verwaltung.raum_erstellen(&anfrage).expect("Erstellen");
        assert!(handle.hat_geheimnis);

        let falsch = handle.beitreten(Some("falsch".into()), "anna".into()).await;
        assert!(falsch.is_err());
        let richtig = handle.beitreten(Some("parole".into()), "anna".into()).await;
        assert!(richtig.is_ok());
    }
}
