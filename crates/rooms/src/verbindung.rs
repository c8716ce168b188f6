//! Client-Verbindung – verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientVerbindung` in einem eigenen
//! tokio-Task. Vor der Admission nimmt die Verbindung nur Beitritts- und
//! Erstellungsanfragen an; danach uebersetzt sie Client-Payloads in
//! Befehle an den Raum-Task und pumpt die Delta-Queue des Teilnehmers
//! zurueck auf den Socket.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive` einen Ping
//! - Geht laenger als `timeout` nichts ein, wird die Verbindung getrennt
//!
//! Fehlerhafte Frames (ungueltiges JSON) verwirft bereits der Codec, die
//! Verbindung bleibt bestehen; nur echte IO-Fehler und ueberlange Frames
//! beenden den Task.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::Framed;

use werkraum_core::types::SitzungsId;
use werkraum_protocol::{
    FehlerCode, FrameCodec, RaumNachricht, RaumPayload,
};

use crate::befehle::Befehl;
use crate::raum::RaumHandle;
use crate::verlauf::VerlaufSpeicher;
use crate::verwaltung::RaumVerwaltung;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Timing-Konfiguration einer Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsKonfig {
    /// Intervall zwischen Server-Pings
    pub keepalive: Duration,
    /// Maximale Stille bevor die Verbindung getrennt wird
    pub timeout: Duration,
}

impl Default for VerbindungsKonfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(15),
            timeout: Duration::from_secs(45),
        }
    }
}

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// ClientVerbindung
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientVerbindung<V: VerlaufSpeicher> {
    verwaltung: RaumVerwaltung<V>,
    konfig: VerbindungsKonfig,
    peer_addr: SocketAddr,
}

impl<V: VerlaufSpeicher> ClientVerbindung<V> {
    /// Erstellt eine neue ClientVerbindung
    pub fn neu(
        verwaltung: RaumVerwaltung<V>,
        konfig: VerbindungsKonfig,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            verwaltung,
            konfig,
            peer_addr,
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht.
    pub async fn verarbeiten(self, stream: TcpStream, mut shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        tracing::info!(peer = %peer_addr, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::new());

        // Delta-Queue des Teilnehmers; vor der Admission ein Platzhalter
        // dessen Sender wir halten, damit recv() nie abschliesst
        let (_platzhalter_tx, mut sende_rx) = mpsc::channel::<RaumNachricht>(1);
        let mut admission: Option<(RaumHandle, SitzungsId)> = None;

        // Lobby-Ereignisse gehen an jede Verbindung
        let mut lobby_rx = self.verwaltung.lobby_abonnieren();

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + self.konfig.keepalive;
        let mut ping_request_id: u32 = 0;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > self.konfig.timeout {
                tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            let weiter = self
                                .nachricht_verarbeiten(nachricht, &mut framed, &mut sende_rx, &mut admission)
                                .await;
                            if !weiter {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Delta aus dem Raum-Versand
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Delta-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Lobby-Ereignis
                ereignis = lobby_rx.recv() => {
                    match ereignis {
                        Ok(e) => {
                            if framed.send(RaumNachricht::new(0, RaumPayload::Lobby(e))).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(peer = %peer_addr, verpasst = n, "Lobby-Ereignisse verpasst");
                        }
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if jetzt >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        let ping = RaumNachricht::ping(ping_request_id, jetzt_ms());
                        if let Err(e) = framed.send(ping).await {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = Instant::now() + self.konfig.keepalive;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = framed.send(RaumNachricht::abschied("Server wird heruntergefahren")).await;
                        break;
                    }
                }
            }
        }

        // Abgang synchron mit dem Verbindungsende melden
        if let Some((handle, sitzung)) = admission {
            handle.verlassen(sitzung).await;
        }

        tracing::info!(peer = %peer_addr, "Verbindungs-Task beendet");
    }

    /// Verarbeitet eine eingehende Nachricht
    ///
    /// Gibt `false` zurueck wenn die Verbindung beendet werden soll.
    async fn nachricht_verarbeiten(
        &self,
        nachricht: RaumNachricht,
        framed: &mut Framed<TcpStream, FrameCodec>,
        sende_rx: &mut mpsc::Receiver<RaumNachricht>,
        admission: &mut Option<(RaumHandle, SitzungsId)>,
    ) -> bool {
        let request_id = nachricht.request_id;

        match nachricht.payload {
            RaumPayload::Beitreten(_) | RaumPayload::Erstellen(_) => {
                if admission.is_some() {
                    let antwort = RaumNachricht::fehler(
                        request_id,
                        FehlerCode::BereitsBeigetreten,
                        "Verbindung ist bereits admittiert",
                    );
                    return framed.send(antwort).await.is_ok();
                }

                let ergebnis = match nachricht.payload {
                    RaumPayload::Beitreten(anfrage) => self
                        .verwaltung
                        .raum(&anfrage.raum_id)
                        .map(|handle| (handle, anfrage.geheimnis, anfrage.name)),
                    RaumPayload::Erstellen(anfrage) => self
                        .verwaltung
                        .raum_erstellen(&anfrage)
                        .map(|handle| (handle, anfrage.geheimnis, anfrage.name)),
                    _ => unreachable!(),
                };

                let ergebnis = match ergebnis {
                    Ok((handle, geheimnis, name)) => handle
                        .beitreten(geheimnis, name)
                        .await
                        .map(|erfolg| (handle, erfolg)),
                    Err(e) => Err(e),
                };

                match ergebnis {
                    Ok((handle, erfolg)) => {
                        let sitzung = erfolg.bestaetigung.sitzung;
                        let antwort = RaumNachricht::new(
                            request_id,
                            RaumPayload::Beigetreten(erfolg.bestaetigung),
                        );
                        if framed.send(antwort).await.is_err() {
                            // Der Teilnehmer wurde schon admittiert; der
                            // Cleanup am Verbindungsende meldet den Abgang
                            *admission = Some((handle, sitzung));
                            return false;
                        }
                        *sende_rx = erfolg.empfang;
                        *admission = Some((handle, sitzung));
                        true
                    }
                    Err(e) => {
                        tracing::debug!(peer = %self.peer_addr, fehler = %e, "Admission abgelehnt");
                        let antwort =
                            RaumNachricht::fehler(request_id, e.fehler_code(), e.to_string());
                        framed.send(antwort).await.is_ok()
                    }
                }
            }

            RaumPayload::Abschied { grund } => {
                tracing::info!(peer = %self.peer_addr, grund = ?grund, "Geordneter Abschied");
                false
            }

            RaumPayload::Ping(ping) => {
                let pong = RaumNachricht::pong(request_id, ping.timestamp_ms, jetzt_ms());
                framed.send(pong).await.is_ok()
            }
            RaumPayload::Pong(_) => true,

            // Befehle laufen nur ueber admittierte Verbindungen
            ref payload => {
                match (Befehl::aus_payload(payload), admission.as_ref()) {
                    (Some(befehl), Some((handle, sitzung))) => {
                        // Der Raum kann nur durch Aufloesung verschwinden;
                        // dann beendet ohnehin der Versand die Verbindung
                        let _ = handle.befehl(*sitzung, befehl).await;
                    }
                    (Some(_), None) => {
                        tracing::debug!(peer = %self.peer_addr, "Befehl ohne Admission verworfen");
                    }
                    (None, _) => {
                        tracing::debug!(peer = %self.peer_addr, "Unerwartete Nachrichtenart verworfen");
                    }
                }
                true
            }
        }
    }
}
