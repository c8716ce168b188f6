//! TCP-Listener – bindet den Socket und akzeptiert Verbindungen
//!
//! Der `WerkraumServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer
//! [`ClientVerbindung`].

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::verbindung::{ClientVerbindung, VerbindungsKonfig};
use crate::verlauf::VerlaufSpeicher;
use crate::verwaltung::RaumVerwaltung;

/// TCP-Server des Autoritaetsprozesses
///
/// Bindet einen TCP-Socket und akzeptiert Verbindungen in einer Loop;
/// jede Verbindung laeuft als eigener Task.
pub struct WerkraumServer<V: VerlaufSpeicher> {
    verwaltung: RaumVerwaltung<V>,
    konfig: VerbindungsKonfig,
}

impl<V: VerlaufSpeicher> WerkraumServer<V> {
    /// Erstellt einen neuen Server
    pub fn neu(verwaltung: RaumVerwaltung<V>, konfig: VerbindungsKonfig) -> Self {
        Self { verwaltung, konfig }
    }

    /// Bindet die Adresse und startet die Accept-Loop
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
    pub async fn starten(
        self,
        bind_addr: SocketAddr,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.mit_listener(listener, shutdown_rx).await
    }

    /// Accept-Loop auf einem bereits gebundenen Listener
    ///
    /// Getrennt von [`starten`](Self::starten) damit Aufrufer die tatsaechlich
    /// gebundene Adresse (Port 0) vorher abfragen koennen.
    pub async fn mit_listener(
        self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP-Server gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let verbindung = ClientVerbindung::neu(
                                self.verwaltung.clone(),
                                self.konfig.clone(),
                                peer_addr,
                            );
                            let shutdown_rx_clone = shutdown_rx.clone();

                            tokio::spawn(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("TCP-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP-Server gestoppt");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verlauf::NullVerlauf;
    use crate::verwaltung::RaumStandards;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;
    use werkraum_core::delta::RaumDelta;
    use werkraum_core::types::RaumId;
    use werkraum_protocol::{
        BeitrittsAnfrage, ErstellAnfrage, FehlerCode, FrameCodec, RaumNachricht, RaumPayload,
    };

    type TestClient = Framed<TcpStream, FrameCodec>;

    async fn test_server() -> (SocketAddr, watch::Sender<bool>) {
        let verwaltung =
            RaumVerwaltung::neu(Arc::new(NullVerlauf), RaumStandards::default());
        let server = WerkraumServer::neu(verwaltung, VerbindungsKonfig::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Bind");
        let adresse = listener.local_addr().expect("Adresse");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.mit_listener(listener, shutdown_rx));
        (adresse, shutdown_tx)
    }

    async fn verbinden(adresse: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(adresse).await.expect("Connect");
        Framed::new(stream, FrameCodec::new())
    }

    async fn naechste_nachricht(client: &mut TestClient) -> RaumNachricht {
        tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("Zeitlimit beim Warten auf Nachricht")
            .expect("Stream unerwartet beendet")
            .expect("Frame-Fehler")
    }

    /// Liest Nachrichten bis ein Delta kommt (ueberspringt Lobby/Ping)
    async fn naechstes_delta(client: &mut TestClient) -> RaumDelta {
        loop {
            if let RaumPayload::Delta(delta) = naechste_nachricht(client).await.payload {
                return delta;
            }
        }
    }

    async fn raum_erstellen(client: &mut TestClient, name: &str) -> (RaumId, RaumNachricht) {
        client
            .send(RaumNachricht::new(
                1,
                RaumPayload::Erstellen(ErstellAnfrage {
                    raum_name: "werkstatt".into(),
                    beschreibung: None,
                    geheimnis: None,
                    auto_aufloesen: true,
                    kapazitaet: None,
                    name: name.into(),
                }),
            ))
            .await
            .expect("Senden");

        loop {
            let antwort = naechste_nachricht(client).await;
            if let RaumPayload::Beigetreten(ref b) = antwort.payload {
                return (b.raum_id, antwort);
            }
        }
    }

    async fn beitreten(client: &mut TestClient, raum_id: RaumId, name: &str) -> RaumNachricht {
        client
            .send(RaumNachricht::new(
                2,
                RaumPayload::Beitreten(BeitrittsAnfrage {
                    raum_id,
                    geheimnis: None,
                    name: name.into(),
                }),
            ))
            .await
            .expect("Senden");

        loop {
            let antwort = naechste_nachricht(client).await;
            match antwort.payload {
                RaumPayload::Beigetreten(_) | RaumPayload::Fehler(_) => return antwort,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn erstellen_beitreten_und_deltas_fliessen() {
        let (adresse, _shutdown) = test_server().await;

        let mut anna = verbinden(adresse).await;
        let (raum_id, _) = raum_erstellen(&mut anna, "anna").await;

        // Annas eigene Aufnahme
        let delta = naechstes_delta(&mut anna).await;
        assert!(matches!(delta, RaumDelta::TeilnehmerHinzugefuegt { .. }));

        let mut bernd = verbinden(adresse).await;
        let antwort = beitreten(&mut bernd, raum_id, "bernd").await;
        let bernd_sitzung = match antwort.payload {
            RaumPayload::Beigetreten(b) => {
                assert_eq!(b.schnappschuss.teilnehmer.len(), 1, "anna im Schnappschuss");
                b.sitzung
            }
            other => panic!("Erwartet Beigetreten, erhalten: {other:?}"),
        };

        // Anna sieht Bernds Aufnahme
        let delta = naechstes_delta(&mut anna).await;
        assert!(
            matches!(delta, RaumDelta::TeilnehmerHinzugefuegt { ref teilnehmer } if teilnehmer.sitzung == bernd_sitzung)
        );

        // Bernd bewegt sich; Anna sieht die Positionsaenderung
        bernd
            .send(RaumNachricht::new(
                3,
                RaumPayload::PositionAktualisieren {
                    x: 7.0,
                    y: 8.0,
                    anim: "laufen".into(),
                },
            ))
            .await
            .expect("Senden");

        let delta = naechstes_delta(&mut anna).await;
        match delta {
            RaumDelta::PositionGeaendert { sitzung, x, y, .. } => {
                assert_eq!(sitzung, bernd_sitzung);
                assert_eq!((x, y), (7.0, 8.0));
            }
            other => panic!("Erwartet PositionGeaendert, erhalten: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verbindungsabbruch_entfernt_teilnehmer() {
        let (adresse, _shutdown) = test_server().await;

        let mut anna = verbinden(adresse).await;
        let (raum_id, _) = raum_erstellen(&mut anna, "anna").await;
        let _ = naechstes_delta(&mut anna).await; // eigene Aufnahme

        let mut bernd = verbinden(adresse).await;
        let antwort = beitreten(&mut bernd, raum_id, "bernd").await;
        let bernd_sitzung = match antwort.payload {
            RaumPayload::Beigetreten(b) => b.sitzung,
            other => panic!("Erwartet Beigetreten: {other:?}"),
        };
        let _ = naechstes_delta(&mut anna).await; // Bernds Aufnahme

        // Bernd trennt hart (Socket-Drop ohne Abschied)
        drop(bernd);

        let delta = naechstes_delta(&mut anna).await;
        assert!(
            matches!(delta, RaumDelta::TeilnehmerEntfernt { sitzung } if sitzung == bernd_sitzung),
            "Abgang muss synchron mit dem Verbindungsverlust verteilt werden"
        );
    }

    #[tokio::test]
    async fn beitritt_in_unbekannten_raum_wird_abgelehnt() {
        let (adresse, _shutdown) = test_server().await;

        let mut client = verbinden(adresse).await;
        let antwort = beitreten(&mut client, RaumId::new(), "anna").await;
        match antwort.payload {
            RaumPayload::Fehler(f) => assert_eq!(f.code, FehlerCode::RaumNichtGefunden),
            other => panic!("Erwartet Fehler, erhalten: {other:?}"),
        }
    }

    #[tokio::test]
    async fn doppelter_beitritt_auf_einer_verbindung_ist_fehler() {
        let (adresse, _shutdown) = test_server().await;

        let mut anna = verbinden(adresse).await;
        let (raum_id, _) = raum_erstellen(&mut anna, "anna").await;

        anna.send(RaumNachricht::new(
            9,
            RaumPayload::Beitreten(BeitrittsAnfrage {
                raum_id,
                geheimnis: None,
                name: "anna-zwei".into(),
            }),
        ))
        .await
        .expect("Senden");

        loop {
            let antwort = naechste_nachricht(&mut anna).await;
            if let RaumPayload::Fehler(f) = antwort.payload {
                assert_eq!(f.code, FehlerCode::BereitsBeigetreten);
                break;
            }
        }
    }

    #[tokio::test]
    async fn fehlerhafter_frame_trennt_nicht() {
        use tokio::io::AsyncWriteExt;

        let (adresse, _shutdown) = test_server().await;

        let mut stream = TcpStream::connect(adresse).await.expect("Connect");
        // Frame mit kaputtem JSON von Hand schreiben
        let kaputt = b"kein json";
        stream
            .write_all(&(kaputt.len() as u32).to_be_bytes())
            .await
            .expect("Laenge");
        stream.write_all(kaputt).await.expect("Payload");

        // Danach funktioniert die Verbindung weiter
        let mut client = Framed::new(stream, FrameCodec::new());
        client
            .send(RaumNachricht::ping(5, 123))
            .await
            .expect("Ping senden");

        loop {
            let antwort = naechste_nachricht(&mut client).await;
            if let RaumPayload::Pong(pong) = antwort.payload {
                assert_eq!(pong.ping_timestamp_ms, 123);
                break;
            }
        }
    }

    #[tokio::test]
    async fn shutdown_sendet_abschied() {
        let (adresse, shutdown) = test_server().await;

        let mut anna = verbinden(adresse).await;
        let _ = raum_erstellen(&mut anna, "anna").await;

        shutdown.send(true).expect("Shutdown-Signal");

        loop {
            let nachricht = naechste_nachricht(&mut anna).await;
            if let RaumPayload::Abschied { .. } = nachricht.payload {
                break;
            }
        }
    }
}
