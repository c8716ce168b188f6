//! Peer-Medien-Mesh-Manager
//!
//! Haelt fuer den lokalen Teilnehmer genau einen Link pro ko-praesentem,
//! medien-bereitem Peer, solange die eigenen Medien aktiviert sind.
//! Gespeist wird der Manager aus den Praesenz-Ereignissen des
//! Zustands-Replikats; Befehlsverarbeitung und Raumzustand bleiben von
//! Medienausfaellen unberuehrt.
//!
//! Verhandlungsfehler werden pro Peer mit begrenztem Backoff wiederholt;
//! danach gilt nur dieser Peer als degradiert (kein Video fuer ihn, die
//! Sitzung laeuft weiter).

use std::collections::{HashMap, HashSet};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use werkraum_client::PraesenzEreignis;
use werkraum_core::backoff::BackoffRichtlinie;
use werkraum_core::types::SitzungsId;

use crate::adresse::adresse_bereinigen;
use crate::error::{MedienError, MedienResult};
use crate::grenze::{MedienAngebot, MedienSchnittstelle, MedienVerbindung};

/// Kapazitaet des Mesh-Ereignis-Kanals
const EREIGNIS_QUEUE_GROESSE: usize = 32;

/// Die bereinigte Mesh-Adresse einer Sitzung
///
/// Beide Seiten eines Links leiten die Adresse deterministisch aus der
/// Sitzungs-ID ab.
pub fn peer_adresse(sitzung: SitzungsId) -> String {
    adresse_bereinigen(&sitzung.to_string())
}

/// Topologie-Ereignisse des Mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEreignis {
    LinkGeoeffnet { sitzung: SitzungsId },
    LinkGeschlossen { sitzung: SitzungsId },
    PeerDegradiert { sitzung: SitzungsId },
}

/// Der Mesh-Manager des lokalen Teilnehmers
pub struct MedienMesh<M: MedienSchnittstelle> {
    schnittstelle: M,
    /// Offene Links, genau einer pro Peer
    verbindungen: HashMap<SitzungsId, M::Verbindung>,
    /// Ko-praesente Peers mit gesetztem Bereit-Flag
    bereite_peers: HashSet<SitzungsId>,
    /// Peers mit erschoepften Verhandlungsversuchen
    degradierte: HashSet<SitzungsId>,
    /// Aktive Capture-Quelle, None bei Kamera aus
    quelle: Option<M::Quelle>,
    /// Lokales Medien-Opt-in
    medien_an: bool,
    richtlinie: BackoffRichtlinie,
    ereignis_tx: broadcast::Sender<MeshEreignis>,
}

impl<M: MedienSchnittstelle> MedienMesh<M> {
    pub fn neu(schnittstelle: M, richtlinie: BackoffRichtlinie) -> Self {
        let (ereignis_tx, _) = broadcast::channel(EREIGNIS_QUEUE_GROESSE);
        Self {
            schnittstelle,
            verbindungen: HashMap::new(),
            bereite_peers: HashSet::new(),
            degradierte: HashSet::new(),
            quelle: None,
            medien_an: false,
            richtlinie,
            ereignis_tx,
        }
    }

    /// Abonniert Topologie-Ereignisse
    pub fn ereignis_abonnieren(&self) -> broadcast::Receiver<MeshEreignis> {
        self.ereignis_tx.subscribe()
    }

    pub fn medien_an(&self) -> bool {
        self.medien_an
    }

    pub fn anzahl_links(&self) -> usize {
        self.verbindungen.len()
    }

    pub fn ist_degradiert(&self, sitzung: SitzungsId) -> bool {
        self.degradierte.contains(&sitzung)
    }

    // -----------------------------------------------------------------------
    // Praesenz
    // -----------------------------------------------------------------------

    /// Verarbeitet ein Praesenz-Ereignis des Replikats
    pub async fn praesenz_verarbeiten(&mut self, ereignis: PraesenzEreignis) {
        match ereignis {
            PraesenzEreignis::TeilnehmerHinzugefuegt { teilnehmer } => {
                if teilnehmer.medien_bereit {
                    self.bereit_setzen(teilnehmer.sitzung, true).await;
                }
            }
            PraesenzEreignis::TeilnehmerEntfernt { sitzung } => {
                self.bereite_peers.remove(&sitzung);
                self.degradierte.remove(&sitzung);
                self.link_schliessen(sitzung);
            }
            PraesenzEreignis::MedienBereitGeaendert { sitzung, bereit } => {
                self.bereit_setzen(sitzung, bereit).await;
            }
            PraesenzEreignis::MedienAktivGeaendert { sitzung, aktiv } => {
                // Reine Information; die Link-Topologie haengt am Bereit-Flag
                debug!(sitzung = %sitzung, aktiv, "Peer-Medienstatus geaendert");
            }
        }
    }

    async fn bereit_setzen(&mut self, sitzung: SitzungsId, bereit: bool) {
        if bereit {
            self.bereite_peers.insert(sitzung);
            if self.medien_an && !self.verbindungen.contains_key(&sitzung) {
                self.link_oeffnen(sitzung).await;
            }
        } else {
            self.bereite_peers.remove(&sitzung);
            self.degradierte.remove(&sitzung);
            self.link_schliessen(sitzung);
        }
    }

    // -----------------------------------------------------------------------
    // Lokales Opt-in & Kamera
    // -----------------------------------------------------------------------

    /// Aktiviert die eigenen Medien und oeffnet Links zu allen bereiten Peers
    pub async fn medien_aktivieren(&mut self) -> MedienResult<()> {
        if self.medien_an {
            return Ok(());
        }
        let quelle = self.schnittstelle.quelle_erfassen().await?;
        self.quelle = Some(quelle);
        self.medien_an = true;

        let peers: Vec<SitzungsId> = self.bereite_peers.iter().copied().collect();
        for sitzung in peers {
            if !self.verbindungen.contains_key(&sitzung) {
                self.link_oeffnen(sitzung).await;
            }
        }
        info!(links = self.verbindungen.len(), "Medien aktiviert");
        Ok(())
    }

    /// Deaktiviert die eigenen Medien und schliesst alle Links
    pub fn medien_deaktivieren(&mut self) {
        if !self.medien_an {
            return;
        }
        self.medien_an = false;
        self.quelle = None;
        let peers: Vec<SitzungsId> = self.verbindungen.keys().copied().collect();
        for sitzung in peers {
            self.link_schliessen(sitzung);
        }
        self.degradierte.clear();
        info!("Medien deaktiviert, alle Links geschlossen");
    }

    /// Gibt die Capture-Quelle frei; offene Links bleiben bestehen
    pub fn kamera_aus(&mut self) {
        self.quelle = None;
        debug!("Capture-Quelle freigegeben");
    }

    /// Erfasst eine frische Quelle und tauscht sie in jeden offenen Link
    pub async fn kamera_an(&mut self) -> MedienResult<()> {
        if !self.medien_an {
            return Err(MedienError::MedienInaktiv);
        }
        let quelle = self.schnittstelle.quelle_erfassen().await?;
        for (sitzung, verbindung) in self.verbindungen.iter_mut() {
            if let Err(e) = verbindung.quelle_ersetzen(quelle.clone()) {
                warn!(sitzung = %sitzung, fehler = %e, "Quellentausch fehlgeschlagen");
            }
        }
        self.quelle = Some(quelle);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Anrufe
    // -----------------------------------------------------------------------

    /// Beantwortet ein eingehendes Angebot
    ///
    /// Wird nur bei aktivierten Medien angenommen, sonst abgelehnt.
    pub async fn eingehender_anruf(
        &mut self,
        sitzung: SitzungsId,
        angebot: MedienAngebot,
    ) -> MedienResult<()> {
        if !self.medien_an {
            debug!(sitzung = %sitzung, "Anruf bei deaktivierten Medien abgelehnt");
            return Err(MedienError::MedienInaktiv);
        }
        let quelle = self.quelle.clone().ok_or(MedienError::QuelleFehlt)?;
        let verbindung = self.schnittstelle.annehmen(&angebot, quelle).await?;
        // Ein etwaiger alter Link zum selben Peer wird ersetzt
        self.link_schliessen(sitzung);
        self.verbindungen.insert(sitzung, verbindung);
        self.degradierte.remove(&sitzung);
        let _ = self.ereignis_tx.send(MeshEreignis::LinkGeoeffnet { sitzung });
        Ok(())
    }

    /// Oeffnet einen ausgehenden Link mit begrenzten Wiederholungen
    async fn link_oeffnen(&mut self, sitzung: SitzungsId) {
        let Some(quelle) = self.quelle.clone() else {
            debug!(sitzung = %sitzung, "Kein Link ohne Capture-Quelle");
            return;
        };
        let adresse = peer_adresse(sitzung);
        let mut fehlversuche: u32 = 0;
        loop {
            match self.schnittstelle.anrufen(&adresse, quelle.clone()).await {
                Ok(verbindung) => {
                    self.verbindungen.insert(sitzung, verbindung);
                    self.degradierte.remove(&sitzung);
                    let _ = self.ereignis_tx.send(MeshEreignis::LinkGeoeffnet { sitzung });
                    return;
                }
                Err(e) => {
                    fehlversuche += 1;
                    if !self.richtlinie.darf_wiederholen(fehlversuche) {
                        warn!(
                            sitzung = %sitzung,
                            versuche = fehlversuche,
                            fehler = %e,
                            "Verhandlung erschoepft, Peer degradiert"
                        );
                        self.degradierte.insert(sitzung);
                        let _ = self
                            .ereignis_tx
                            .send(MeshEreignis::PeerDegradiert { sitzung });
                        return;
                    }
                    debug!(sitzung = %sitzung, versuch = fehlversuche, fehler = %e, "Verhandlung fehlgeschlagen, wiederhole");
                    tokio::time::sleep(self.richtlinie.verzoegerung(fehlversuche)).await;
                }
            }
        }
    }

    fn link_schliessen(&mut self, sitzung: SitzungsId) {
        if let Some(mut verbindung) = self.verbindungen.remove(&sitzung) {
            verbindung.schliessen();
            let _ = self
                .ereignis_tx
                .send(MeshEreignis::LinkGeschlossen { sitzung });
        }
    }
}

/// Treibt den Mesh-Manager aus einem Praesenz-Abonnement
///
/// Laeuft bis das Replikat den Kanal schliesst; verpasste Ereignisse
/// nach einem Lag werden uebersprungen.
pub async fn praesenz_betreiben<M: MedienSchnittstelle>(
    mesh: &mut MedienMesh<M>,
    praesenz: &mut broadcast::Receiver<PraesenzEreignis>,
) {
    loop {
        match praesenz.recv().await {
            Ok(ereignis) => mesh.praesenz_verarbeiten(ereignis).await,
            Err(broadcast::error::RecvError::Lagged(anzahl)) => {
                warn!(verpasst = anzahl, "Praesenz-Ereignisse verpasst");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use werkraum_core::backoff::kein_jitter;
    use werkraum_core::state::Teilnehmer;

    use super::*;

    type Protokoll = Arc<Mutex<Vec<String>>>;

    struct MockVerbindung {
        peer: String,
        protokoll: Protokoll,
    }

    impl MedienVerbindung for MockVerbindung {
        type Quelle = u32;

        fn quelle_ersetzen(&mut self, quelle: u32) -> MedienResult<()> {
            self.protokoll
                .lock()
                .push(format!("ersetzen:{}:{quelle}", self.peer));
            Ok(())
        }

        fn schliessen(&mut self) {
            self.protokoll.lock().push(format!("schliessen:{}", self.peer));
        }
    }

    struct MockSchnittstelle {
        protokoll: Protokoll,
        naechste_quelle: AtomicU32,
        /// Budget an Anruf-Fehlschlaegen bevor Anrufe gelingen
        fehlschlaege: AtomicU32,
    }

    impl MockSchnittstelle {
        fn neu(fehlschlaege: u32) -> (Self, Protokoll) {
            let protokoll: Protokoll = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    protokoll: Arc::clone(&protokoll),
                    naechste_quelle: AtomicU32::new(1),
                    fehlschlaege: AtomicU32::new(fehlschlaege),
                },
                protokoll,
            )
        }
    }

    impl MedienSchnittstelle for MockSchnittstelle {
        type Quelle = u32;
        type Verbindung = MockVerbindung;

        async fn quelle_erfassen(&self) -> MedienResult<u32> {
            let quelle = self.naechste_quelle.fetch_add(1, Ordering::SeqCst);
            self.protokoll.lock().push(format!("erfassen:{quelle}"));
            Ok(quelle)
        }

        async fn anrufen(&self, adresse: &str, quelle: u32) -> MedienResult<MockVerbindung> {
            if self.fehlschlaege.load(Ordering::SeqCst) > 0 {
                self.fehlschlaege.fetch_sub(1, Ordering::SeqCst);
                return Err(MedienError::QuelleNichtVerfuegbar("Skript".into()));
            }
            self.protokoll
                .lock()
                .push(format!("anruf:{adresse}:{quelle}"));
            Ok(MockVerbindung {
                peer: adresse.to_string(),
                protokoll: Arc::clone(&self.protokoll),
            })
        }

        async fn annehmen(
            &self,
            angebot: &MedienAngebot,
            quelle: u32,
        ) -> MedienResult<MockVerbindung> {
            self.protokoll
                .lock()
                .push(format!("annahme:{}:{quelle}", angebot.von));
            Ok(MockVerbindung {
                peer: angebot.von.clone(),
                protokoll: Arc::clone(&self.protokoll),
            })
        }
    }

    fn test_richtlinie() -> BackoffRichtlinie {
        BackoffRichtlinie {
            basis: Duration::from_millis(1),
            faktor: 1.0,
            obergrenze: Duration::from_millis(5),
            max_versuche: 2,
            jitter: kein_jitter,
        }
    }

    fn bereiter_teilnehmer(sitzung: SitzungsId) -> Teilnehmer {
        let mut t = Teilnehmer::neu(sitzung);
        t.medien_bereit = true;
        t
    }

    #[tokio::test]
    async fn aktivierung_oeffnet_genau_einen_link_pro_bereitem_peer() {
        let (schnittstelle, protokoll) = MockSchnittstelle::neu(0);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());

        let peer_a = SitzungsId::new();
        let peer_b = SitzungsId::new();
        for peer in [peer_a, peer_b] {
            mesh.praesenz_verarbeiten(PraesenzEreignis::TeilnehmerHinzugefuegt {
                teilnehmer: bereiter_teilnehmer(peer),
            })
            .await;
        }
        assert_eq!(mesh.anzahl_links(), 0, "Ohne Opt-in keine Links");

        mesh.medien_aktivieren().await.expect("Aktivierung");
        assert_eq!(mesh.anzahl_links(), 2);

        mesh.medien_deaktivieren();
        assert_eq!(mesh.anzahl_links(), 0);
        let eintraege = protokoll.lock();
        assert_eq!(
            eintraege.iter().filter(|e| e.starts_with("schliessen:")).count(),
            2,
            "Beide Links geschlossen"
        );
    }

    #[tokio::test]
    async fn spaeter_bereiter_peer_bekommt_link() {
        let (schnittstelle, _) = MockSchnittstelle::neu(0);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());
        mesh.medien_aktivieren().await.expect("Aktivierung");

        let peer = SitzungsId::new();
        mesh.praesenz_verarbeiten(PraesenzEreignis::MedienBereitGeaendert {
            sitzung: peer,
            bereit: true,
        })
        .await;
        assert_eq!(mesh.anzahl_links(), 1);
    }

    #[tokio::test]
    async fn peer_abgang_schliesst_link() {
        let (schnittstelle, protokoll) = MockSchnittstelle::neu(0);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());
        mesh.medien_aktivieren().await.expect("Aktivierung");

        let peer = SitzungsId::new();
        mesh.praesenz_verarbeiten(PraesenzEreignis::TeilnehmerHinzugefuegt {
            teilnehmer: bereiter_teilnehmer(peer),
        })
        .await;
        assert_eq!(mesh.anzahl_links(), 1);

        mesh.praesenz_verarbeiten(PraesenzEreignis::TeilnehmerEntfernt { sitzung: peer })
            .await;
        assert_eq!(mesh.anzahl_links(), 0);
        assert!(protokoll
            .lock()
            .iter()
            .any(|e| e == &format!("schliessen:{}", peer_adresse(peer))));
    }

    #[tokio::test]
    async fn erschoepfte_verhandlung_degradiert_nur_den_peer() {
        let (schnittstelle, _) = MockSchnittstelle::neu(u32::MAX);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());
        let mut ereignisse = mesh.ereignis_abonnieren();

        let peer = SitzungsId::new();
        mesh.praesenz_verarbeiten(PraesenzEreignis::TeilnehmerHinzugefuegt {
            teilnehmer: bereiter_teilnehmer(peer),
        })
        .await;
        mesh.medien_aktivieren().await.expect("Aktivierung");

        assert_eq!(mesh.anzahl_links(), 0);
        assert!(mesh.ist_degradiert(peer));
        assert!(mesh.medien_an(), "Die Sitzung ueberlebt den Medienausfall");
        assert_eq!(
            ereignisse.try_recv().expect("Ereignis"),
            MeshEreignis::PeerDegradiert { sitzung: peer }
        );
    }

    #[tokio::test]
    async fn eingehender_anruf_nur_bei_aktivierten_medien() {
        let (schnittstelle, _) = MockSchnittstelle::neu(0);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());
        let peer = SitzungsId::new();
        let angebot = MedienAngebot {
            von: peer_adresse(peer),
        };

        let ergebnis = mesh.eingehender_anruf(peer, angebot.clone()).await;
        assert!(matches!(ergebnis, Err(MedienError::MedienInaktiv)));

        mesh.medien_aktivieren().await.expect("Aktivierung");
        mesh.eingehender_anruf(peer, angebot).await.expect("Annahme");
        assert_eq!(mesh.anzahl_links(), 1);
    }

    #[tokio::test]
    async fn kamera_wechsel_tauscht_quelle_in_offenen_links() {
        let (schnittstelle, protokoll) = MockSchnittstelle::neu(0);
        let mut mesh = MedienMesh::neu(schnittstelle, test_richtlinie());
        let peer = SitzungsId::new();
        mesh.praesenz_verarbeiten(PraesenzEreignis::TeilnehmerHinzugefuegt {
            teilnehmer: bereiter_teilnehmer(peer),
        })
        .await;
        mesh.medien_aktivieren().await.expect("Aktivierung");

        mesh.kamera_aus();
        assert_eq!(mesh.anzahl_links(), 1, "Links ueberleben Kamera aus");

        mesh.kamera_an().await.expect("Kamera an");
        // Quelle 1 kam aus der Aktivierung, Quelle 2 aus dem Neustart
        assert!(protokoll
            .lock()
            .iter()
            .any(|e| e == &format!("ersetzen:{}:2", peer_adresse(peer))));
    }
}
