//! Verbindungs-Zustandsmaschine des Clients
//!
//! ## State Machine
//! ```text
//! Getrennt -> Verbindet -> RaumVerhandlung -> Synchronisiert <-> Beeintraechtigt
//!                 ^                                |
//!                 |                          (Abbruch)
//!                 |                                v
//!                 +--------- VerbindetNeu <-------+
//!                                   |
//!                       (Versuche erschoepft)
//!                                   v
//!                          EndgueltigGetrennt
//! ```
//!
//! Nach einer abnormalen Trennung verbindet die Maschine automatisch neu
//! zum letzten Raumziel, mit exponentiellem Backoff und Jitter. Geordnete
//! Trennungen (Abschied, Server-Schliessung) enden in `Getrennt` ohne
//! Neuverbindung. Ein neuer `verbinden`-Aufruf ueberholt laufende
//! Versuche ueber einen Generationszaehler: verspaetete Admissions
//! veralteter Versuche werden verworfen.
//!
//! Befehle sind nur im Zustand `Synchronisiert` zulaessig; ausserhalb
//! schlagen sie sofort lokal fehl statt gepuffert zu werden.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use werkraum_core::backoff::BackoffRichtlinie;
use werkraum_core::types::{ObjektId, RaumId};
use werkraum_protocol::{
    BeitrittsAnfrage, ErstellAnfrage, LobbyEreignis, RaumNachricht, RaumPayload,
};

use crate::error::{ClientError, ClientResult};
use crate::replik::Replik;
use crate::transport::{TransportEreignis, TransportFabrik};

/// Kapazitaet des Lobby-Broadcast-Kanals
const LOBBY_QUEUE_GROESSE: usize = 64;

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Zustand, Ziel & Konfiguration
// ---------------------------------------------------------------------------

/// Beobachtbarer Zustand der Verbindungs-Zustandsmaschine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Keine Verbindung, kein laufender Aufbau
    Getrennt,
    /// Transportaufbau laeuft
    Verbindet,
    /// Transport steht, Admission ausstehend
    RaumVerhandlung,
    /// Admittiert, Replikat aktuell
    Synchronisiert,
    /// Verbunden, aber es fliessen keine Daten mehr
    Beeintraechtigt,
    /// Automatischer Neuaufbau nach abnormaler Trennung
    VerbindetNeu,
    /// Alle Versuche erschoepft; nur ein neuer `verbinden`-Aufruf hilft
    EndgueltigGetrennt,
}

/// Das Raumziel eines Verbindungsaufbaus
///
/// Bleibt fuer automatische Neuverbindungen erhalten: ein Beitrittsziel
/// wird erneut beigetreten, ein Erstellungsziel mit denselben Parametern
/// erneut erstellt.
#[derive(Debug, Clone)]
pub enum RaumZiel {
    /// Beitritt in einen bestehenden Raum
    Vorhanden {
        raum_id: RaumId,
        geheimnis: Option<String>,
        name: String,
    },
    /// Erstellung eines neuen Raums
    Neu(ErstellAnfrage),
}

impl RaumZiel {
    fn beitritts_payload(&self) -> RaumPayload {
        match self {
            Self::Vorhanden {
                raum_id,
                geheimnis,
                name,
            } => RaumPayload::Beitreten(BeitrittsAnfrage {
                raum_id: *raum_id,
                geheimnis: geheimnis.clone(),
                name: name.clone(),
            }),
            Self::Neu(anfrage) => RaumPayload::Erstellen(anfrage.clone()),
        }
    }
}

/// Timing- und Backoff-Konfiguration des Clients
#[derive(Debug, Clone)]
pub struct ClientKonfig {
    /// Zeitlimit fuer den Transportaufbau
    pub verbindungs_timeout: Duration,
    /// Zeitlimit fuer die Admission nach Transportaufbau
    pub synchronisations_timeout: Duration,
    /// Stille bevor `Synchronisiert` zu `Beeintraechtigt` degradiert
    pub stille_timeout: Duration,
    pub backoff: BackoffRichtlinie,
}

impl Default for ClientKonfig {
    fn default() -> Self {
        Self {
            verbindungs_timeout: Duration::from_secs(5),
            synchronisations_timeout: Duration::from_secs(5),
            stille_timeout: Duration::from_secs(45),
            backoff: BackoffRichtlinie::standard(),
        }
    }
}

// ---------------------------------------------------------------------------
// WerkraumClient
// ---------------------------------------------------------------------------

/// Client-Handle auf Verbindung und Replikat
///
/// Clone ist billig; alle Clones teilen Verbindung und Zustand.
pub struct WerkraumClient<F: TransportFabrik> {
    inner: Arc<ClientInner<F>>,
}

impl<F: TransportFabrik> Clone for WerkraumClient<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<F: TransportFabrik> {
    fabrik: F,
    konfig: ClientKonfig,
    zustand_tx: watch::Sender<VerbindungsZustand>,
    replik: Replik,
    /// Sende-Queue des aktiven Transports
    ausgang: Mutex<Option<mpsc::Sender<RaumNachricht>>>,
    /// Letztes Raumziel fuer automatische Neuverbindungen
    ziel: Mutex<Option<RaumZiel>>,
    /// Generationszaehler; jeder neue Aufbau ueberholt alle aelteren
    generation: AtomicU64,
    naechste_request_id: AtomicU32,
    lobby_tx: broadcast::Sender<LobbyEreignis>,
}

impl<F: TransportFabrik> WerkraumClient<F> {
    /// Erstellt einen neuen Client im Zustand `Getrennt`
    pub fn neu(fabrik: F, konfig: ClientKonfig) -> Self {
        let (zustand_tx, _) = watch::channel(VerbindungsZustand::Getrennt);
        let (lobby_tx, _) = broadcast::channel(LOBBY_QUEUE_GROESSE);
        Self {
            inner: Arc::new(ClientInner {
                fabrik,
                konfig,
                zustand_tx,
                replik: Replik::neu(),
                ausgang: Mutex::new(None),
                ziel: Mutex::new(None),
                generation: AtomicU64::new(0),
                naechste_request_id: AtomicU32::new(1),
                lobby_tx,
            }),
        }
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> VerbindungsZustand {
        *self.inner.zustand_tx.borrow()
    }

    /// Beobachtet Zustandsuebergaenge
    pub fn zustand_beobachten(&self) -> watch::Receiver<VerbindungsZustand> {
        self.inner.zustand_tx.subscribe()
    }

    /// Das lokale Zustands-Replikat
    pub fn replik(&self) -> &Replik {
        &self.inner.replik
    }

    /// Abonniert Lobby-Ereignisse des Servers
    pub fn lobby_abonnieren(&self) -> broadcast::Receiver<LobbyEreignis> {
        self.inner.lobby_tx.subscribe()
    }

    /// Baut eine Verbindung zum Raumziel auf
    ///
    /// Blockiert bis die Admission steht oder der Aufbau endgueltig
    /// gescheitert ist. Ein parallel laufender aelterer Aufbau wird
    /// ueberholt und verworfen.
    pub async fn verbinden(&self, ziel: RaumZiel) -> ClientResult<()> {
        *self.inner.ziel.lock() = Some(ziel);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Self::verbindungs_schleife(
            Arc::clone(&self.inner),
            generation,
            VerbindungsZustand::Verbindet,
        )
        .await
    }

    /// Trennt geordnet und unterbindet automatische Neuverbindungen
    pub fn trennen(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = self.inner.ausgang.lock().take() {
            let _ = sender.try_send(RaumNachricht::abschied("Client trennt"));
        }
        self.inner.replik.zuruecksetzen();
        self.inner.zustand_tx.send_replace(VerbindungsZustand::Getrennt);
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    /// Sendet eine Befehls-Payload an die Autoritaet
    ///
    /// Ausserhalb von `Synchronisiert` sofortiger lokaler Fehler; es wird
    /// nichts gepuffert.
    pub fn befehl_senden(&self, payload: RaumPayload) -> ClientResult<()> {
        if self.zustand() != VerbindungsZustand::Synchronisiert {
            return Err(ClientError::NichtSynchronisiert);
        }
        let sender = self
            .inner
            .ausgang
            .lock()
            .clone()
            .ok_or(ClientError::NichtSynchronisiert)?;
        let request_id = self.inner.naechste_request_id.fetch_add(1, Ordering::Relaxed);
        sender
            .try_send(RaumNachricht::new(request_id, payload))
            .map_err(|_| ClientError::Getrennt)
    }

    pub fn position_senden(&self, x: f32, y: f32, anim: impl Into<String>) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::PositionAktualisieren {
            x,
            y,
            anim: anim.into(),
        })
    }

    pub fn name_senden(&self, name: impl Into<String>) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::NameAktualisieren { name: name.into() })
    }

    pub fn medien_bereit_melden(&self) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::MedienBereit)
    }

    pub fn medien_aktiv_melden(&self) -> ClientResult<()> {
        let sitzung = self
            .inner
            .replik
            .eigene_sitzung()
            .ok_or(ClientError::NichtSynchronisiert)?;
        self.befehl_senden(RaumPayload::MedienAktiv { sitzung })
    }

    pub fn objekt_anheften(&self, objekt: ObjektId) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::ObjektAnheften { objekt })
    }

    pub fn objekt_loesen(&self, objekt: ObjektId) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::ObjektLoesen { objekt })
    }

    pub fn chat_senden(&self, inhalt: impl Into<String>) -> ClientResult<()> {
        self.befehl_senden(RaumPayload::ChatAnhaengen {
            inhalt: inhalt.into(),
        })
    }

    // -----------------------------------------------------------------------
    // Verbindungsaufbau
    // -----------------------------------------------------------------------

    /// Versuchsschleife mit Backoff
    ///
    /// Gibt einen geboxten Future zurueck: Empfangs-Task und
    /// Verbindungsschleife starten sich wechselseitig, die Typloeschung
    /// bricht den rekursiven Future-Typ auf.
    fn verbindungs_schleife(
        inner: Arc<ClientInner<F>>,
        generation: u64,
        start_zustand: VerbindungsZustand,
    ) -> Pin<Box<dyn Future<Output = ClientResult<()>> + Send>> {
        Box::pin(async move {
            let mut fehlversuche: u32 = 0;
            loop {
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return Err(ClientError::Ueberholt);
                }
                inner.zustand_tx.send_replace(start_zustand);

                match Self::einzelversuch(&inner, generation).await {
                    Ok(()) => {
                        inner.zustand_tx.send_replace(VerbindungsZustand::Synchronisiert);
                        return Ok(());
                    }
                    // Ein neuerer Aufbau hat uebernommen; dessen Zustand
                    // darf ein ueberholter Versuch nicht anfassen
                    Err(ClientError::Ueberholt) => return Err(ClientError::Ueberholt),
                    Err(e) if e.ist_wiederholbar() => {
                        fehlversuche += 1;
                        if !inner.konfig.backoff.darf_wiederholen(fehlversuche) {
                            inner
                                .zustand_tx
                                .send_replace(VerbindungsZustand::EndgueltigGetrennt);
                            return Err(ClientError::VersucheErschoepft(fehlversuche));
                        }
                        let pause = inner.konfig.backoff.verzoegerung(fehlversuche);
                        tracing::debug!(
                            versuch = fehlversuche,
                            pause_ms = pause.as_millis() as u64,
                            fehler = %e,
                            "Verbindungsversuch fehlgeschlagen, wiederhole"
                        );
                        tokio::time::sleep(pause).await;
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Verbindungsaufbau endgueltig gescheitert");
                        inner.zustand_tx.send_replace(VerbindungsZustand::Getrennt);
                        return Err(e);
                    }
                }
            }
        })
    }

    /// Ein einzelner Aufbau: Transport, Admission, Replikat-Installation
    async fn einzelversuch(inner: &Arc<ClientInner<F>>, generation: u64) -> ClientResult<()> {
        let paar = tokio::time::timeout(inner.konfig.verbindungs_timeout, inner.fabrik.verbinden())
            .await
            .map_err(|_| ClientError::Zeitlimit("Transportaufbau".into()))??;

        if inner.generation.load(Ordering::SeqCst) != generation {
            return Err(ClientError::Ueberholt);
        }
        inner.zustand_tx.send_replace(VerbindungsZustand::RaumVerhandlung);

        let ziel = inner
            .ziel
            .lock()
            .clone()
            .ok_or_else(|| ClientError::Verbindung("Kein Raumziel gesetzt".into()))?;
        let request_id = inner.naechste_request_id.fetch_add(1, Ordering::Relaxed);
        let ausgang = paar.ausgang;
        let mut eingang = paar.eingang;

        ausgang
            .send(RaumNachricht::new(request_id, ziel.beitritts_payload()))
            .await
            .map_err(|_| ClientError::Getrennt)?;

        let bestaetigung = tokio::time::timeout(inner.konfig.synchronisations_timeout, async {
            loop {
                match eingang.recv().await {
                    Some(TransportEreignis::Nachricht(nachricht)) => match nachricht.payload {
                        RaumPayload::Beigetreten(bestaetigung) => return Ok(bestaetigung),
                        RaumPayload::Fehler(f) => {
                            return Err(ClientError::Abgelehnt {
                                code: f.code,
                                nachricht: f.nachricht,
                            })
                        }
                        RaumPayload::Ping(ping) => {
                            let _ = ausgang.try_send(RaumNachricht::pong(
                                nachricht.request_id,
                                ping.timestamp_ms,
                                jetzt_ms(),
                            ));
                        }
                        // Lobby und Deltas vor der Admission ignorieren
                        _ => {}
                    },
                    Some(TransportEreignis::Geschlossen(_)) | None => {
                        return Err(ClientError::Getrennt)
                    }
                }
            }
        })
        .await
        .map_err(|_| ClientError::Zeitlimit("Admission".into()))??;

        // Eine verspaetete Admission eines ueberholten Versuchs wird
        // verworfen, das Paar faellt einfach zu Boden
        if inner.generation.load(Ordering::SeqCst) != generation {
            return Err(ClientError::Ueberholt);
        }

        inner
            .replik
            .schnappschuss_setzen(bestaetigung.sitzung, bestaetigung.schnappschuss);
        *inner.ausgang.lock() = Some(ausgang.clone());

        tokio::spawn(Self::empfangs_task(
            Arc::clone(inner),
            generation,
            eingang,
            ausgang,
        ));

        tracing::info!(raum_id = %bestaetigung.raum_id, sitzung = %bestaetigung.sitzung, "Synchronisiert");
        Ok(())
    }

    /// Verarbeitet den eingehenden Ereignisstrom einer stehenden Verbindung
    async fn empfangs_task(
        inner: Arc<ClientInner<F>>,
        generation: u64,
        mut eingang: mpsc::Receiver<TransportEreignis>,
        ausgang: mpsc::Sender<RaumNachricht>,
    ) {
        loop {
            let ereignis = match tokio::time::timeout(inner.konfig.stille_timeout, eingang.recv())
                .await
            {
                Err(_) => {
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    // Verbindung steht, aber es fliesst nichts mehr
                    let degradiert = inner.zustand_tx.send_if_modified(|z| {
                        if *z == VerbindungsZustand::Synchronisiert {
                            *z = VerbindungsZustand::Beeintraechtigt;
                            true
                        } else {
                            false
                        }
                    });
                    if degradiert {
                        tracing::warn!("Keine Daten mehr – Verbindung beeintraechtigt");
                    }
                    continue;
                }
                Ok(Some(ereignis)) => ereignis,
                Ok(None) => TransportEreignis::Geschlossen(
                    werkraum_protocol::SchliessCode::Abbruch,
                ),
            };

            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }

            match ereignis {
                TransportEreignis::Nachricht(nachricht) => {
                    inner.zustand_tx.send_if_modified(|z| {
                        if *z == VerbindungsZustand::Beeintraechtigt {
                            *z = VerbindungsZustand::Synchronisiert;
                            true
                        } else {
                            false
                        }
                    });
                    match nachricht.payload {
                        RaumPayload::Delta(delta) => inner.replik.anwenden(&delta),
                        RaumPayload::Lobby(ereignis) => {
                            let _ = inner.lobby_tx.send(ereignis);
                        }
                        RaumPayload::Ping(ping) => {
                            let _ = ausgang.try_send(RaumNachricht::pong(
                                nachricht.request_id,
                                ping.timestamp_ms,
                                jetzt_ms(),
                            ));
                        }
                        RaumPayload::Pong(_) => {}
                        RaumPayload::Abschied { grund } => {
                            tracing::info!(grund = ?grund, "Abschied vom Server");
                        }
                        andere => {
                            tracing::debug!(payload = ?andere, "Unerwartete Nachricht verworfen");
                        }
                    }
                }
                TransportEreignis::Geschlossen(code) => {
                    inner.ausgang.lock().take();
                    inner.replik.zuruecksetzen();

                    if code.ist_abnormal() && inner.ziel.lock().is_some() {
                        tracing::warn!(code = ?code, "Abnormale Trennung – verbinde neu");
                        let neue_generation =
                            inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                        inner.zustand_tx.send_replace(VerbindungsZustand::VerbindetNeu);

                        let schleife = Self::verbindungs_schleife(
                            Arc::clone(&inner),
                            neue_generation,
                            VerbindungsZustand::VerbindetNeu,
                        );
                        tokio::spawn(async move {
                            if let Err(e) = schleife.await {
                                tracing::warn!(fehler = %e, "Neuverbindung gescheitert");
                            }
                        });
                    } else {
                        tracing::info!(code = ?code, "Verbindung geordnet beendet");
                        inner.zustand_tx.send_replace(VerbindungsZustand::Getrennt);
                    }
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
