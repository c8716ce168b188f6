//! Transport-Abstraktion der Client-Seite
//!
//! Die Verbindungs-Zustandsmaschine spricht nie direkt mit einem Socket,
//! sondern mit einem [`TransportPaar`] aus Sende-Queue und Ereignis-Queue.
//! Eine [`TransportFabrik`] stellt pro Verbindungsversuch ein frisches
//! Paar her; fuer Tests laesst sich die Fabrik durch Kanal-Attrappen
//! ersetzen ([`kanal_paar`]).

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use werkraum_protocol::{FrameCodec, RaumNachricht, RaumPayload, SchliessCode};

use crate::error::{ClientError, ClientResult};

/// Groesse der Transport-Queues
pub const TRANSPORT_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Ereignisse & Paar
// ---------------------------------------------------------------------------

/// Ereignis aus dem Transport
#[derive(Debug)]
pub enum TransportEreignis {
    /// Nachricht vom Server
    Nachricht(RaumNachricht),
    /// Transport wurde geschlossen; der Code unterscheidet geordnete von
    /// abnormalen Trennungen
    Geschlossen(SchliessCode),
}

/// Eine aufgebaute Transportverbindung
pub struct TransportPaar {
    /// Nachrichten an den Server
    pub ausgang: mpsc::Sender<RaumNachricht>,
    /// Ereignisse vom Server
    pub eingang: mpsc::Receiver<TransportEreignis>,
}

// ---------------------------------------------------------------------------
// TransportFabrik
// ---------------------------------------------------------------------------

/// Stellt pro Verbindungsversuch eine frische Transportverbindung her
pub trait TransportFabrik: Send + Sync + 'static {
    fn verbinden(&self) -> impl Future<Output = ClientResult<TransportPaar>> + Send;
}

// ---------------------------------------------------------------------------
// TCP-Implementierung
// ---------------------------------------------------------------------------

/// TCP-Transport mit dem Frame-Codec des Steuerkanals
///
/// Ein interner Pump-Task uebersetzt zwischen Socket und Queues; die
/// Zustandsmaschine sieht nur das [`TransportPaar`].
pub struct TcpTransportFabrik {
    adresse: String,
}

impl TcpTransportFabrik {
    pub fn neu(adresse: impl Into<String>) -> Self {
        Self {
            adresse: adresse.into(),
        }
    }
}

impl TransportFabrik for TcpTransportFabrik {
    async fn verbinden(&self) -> ClientResult<TransportPaar> {
        let stream = TcpStream::connect(&self.adresse)
            .await
            .map_err(|e| ClientError::Verbindung(format!("{}: {e}", self.adresse)))?;

        let framed = Framed::new(stream, FrameCodec::new());
        let (mut sink, mut strom) = framed.split();

        let (ausgang_tx, mut ausgang_rx) = mpsc::channel::<RaumNachricht>(TRANSPORT_QUEUE_GROESSE);
        let (ereignis_tx, ereignis_rx) = mpsc::channel::<TransportEreignis>(TRANSPORT_QUEUE_GROESSE);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    ausgehend = ausgang_rx.recv() => {
                        match ausgehend {
                            Some(nachricht) => {
                                if sink.send(nachricht).await.is_err() {
                                    let _ = ereignis_tx
                                        .send(TransportEreignis::Geschlossen(SchliessCode::Abbruch))
                                        .await;
                                    break;
                                }
                            }
                            // Die Zustandsmaschine hat das Paar fallen lassen
                            None => {
                                let _ = sink.close().await;
                                break;
                            }
                        }
                    }
                    frame = strom.next() => {
                        match frame {
                            Some(Ok(nachricht)) => {
                                // Ein Abschied ist eine geordnete Server-Trennung
                                let abschied =
                                    matches!(nachricht.payload, RaumPayload::Abschied { .. });
                                if ereignis_tx
                                    .send(TransportEreignis::Nachricht(nachricht))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                                if abschied {
                                    let _ = ereignis_tx
                                        .send(TransportEreignis::Geschlossen(
                                            SchliessCode::ServerSchliessung,
                                        ))
                                        .await;
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                tracing::debug!(fehler = %e, "Transport-Lesefehler");
                                let _ = ereignis_tx
                                    .send(TransportEreignis::Geschlossen(SchliessCode::Abbruch))
                                    .await;
                                break;
                            }
                            None => {
                                let _ = ereignis_tx
                                    .send(TransportEreignis::Geschlossen(SchliessCode::Abbruch))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(TransportPaar {
            ausgang: ausgang_tx,
            eingang: ereignis_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Kanal-Attrappe fuer Tests
// ---------------------------------------------------------------------------

/// Die Serverseite eines Kanal-Transports
pub struct GegenStelle {
    /// Was der Client gesendet hat
    pub von_client: mpsc::Receiver<RaumNachricht>,
    /// Ereignisse an den Client
    pub zum_client: mpsc::Sender<TransportEreignis>,
}

/// Erstellt ein direkt verdrahtetes Transport-Paar ohne Socket
///
/// Die Zustandsmaschine bekommt das [`TransportPaar`], der Test spielt
/// ueber die [`GegenStelle`] den Server.
pub fn kanal_paar(kapazitaet: usize) -> (TransportPaar, GegenStelle) {
    let (ausgang_tx, ausgang_rx) = mpsc::channel(kapazitaet);
    let (ereignis_tx, ereignis_rx) = mpsc::channel(kapazitaet);
    (
        TransportPaar {
            ausgang: ausgang_tx,
            eingang: ereignis_rx,
        },
        GegenStelle {
            von_client: ausgang_rx,
            zum_client: ereignis_tx,
        },
    )
}
