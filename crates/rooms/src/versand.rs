//! Delta-Versand – verteilt Nachrichten an die Teilnehmer eines Raums
//!
//! Der `RaumVersand` verwaltet die Send-Queues aller admittierten
//! Teilnehmer eines Raums. Versand ist nicht-blockierend (`try_send`):
//! ein langsamer Empfaenger verliert Nachrichten statt den Raum-Task
//! aufzuhalten.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use werkraum_core::types::SitzungsId;
use werkraum_protocol::RaumNachricht;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Send-Queue pro Teilnehmer
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// TeilnehmerSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines admittierten Teilnehmers
#[derive(Clone, Debug)]
pub struct TeilnehmerSender {
    pub sitzung: SitzungsId,
    pub tx: mpsc::Sender<RaumNachricht>,
}

impl TeilnehmerSender {
    /// Sendet eine Nachricht nicht-blockierend an den Teilnehmer
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: RaumNachricht) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(sitzung = %self.sitzung, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(sitzung = %self.sitzung, "Send-Queue geschlossen (Teilnehmer getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RaumVersand
// ---------------------------------------------------------------------------

/// Versand-Registry eines einzelnen Raums
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RaumVersand {
    inner: Arc<RaumVersandInner>,
}

struct RaumVersandInner {
    /// Teilnehmer-Sender, indiziert nach SitzungsId
    teilnehmer: DashMap<SitzungsId, TeilnehmerSender>,
}

impl RaumVersand {
    /// Erstellt einen neuen, leeren Versand
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(RaumVersandInner {
                teilnehmer: DashMap::new(),
            }),
        }
    }

    /// Registriert einen Teilnehmer und gibt seine Empfangs-Queue zurueck
    ///
    /// Der Verbindungs-Task liest aus dieser Queue und sendet via TCP.
    pub fn registrieren(&self, sitzung: SitzungsId) -> mpsc::Receiver<RaumNachricht> {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        let sender = TeilnehmerSender { sitzung, tx };
        self.inner.teilnehmer.insert(sitzung, sender);
        tracing::debug!(sitzung = %sitzung, "Teilnehmer im Versand registriert");
        rx
    }

    /// Entfernt einen Teilnehmer aus dem Versand
    pub fn entfernen(&self, sitzung: &SitzungsId) {
        self.inner.teilnehmer.remove(sitzung);
        tracing::debug!(sitzung = %sitzung, "Teilnehmer aus Versand entfernt");
    }

    /// Sendet eine Nachricht an einen einzelnen Teilnehmer
    ///
    /// Gibt `true` zurueck wenn der Teilnehmer gefunden und die Nachricht
    /// eingereiht wurde.
    pub fn an_sitzung_senden(&self, sitzung: &SitzungsId, nachricht: RaumNachricht) -> bool {
        match self.inner.teilnehmer.get(sitzung) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(sitzung = %sitzung, "Senden an unbekannte Sitzung");
                false
            }
        }
    }

    /// Sendet eine Nachricht an alle Teilnehmer des Raums
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_alle_senden(&self, nachricht: RaumNachricht) -> usize {
        let mut gesendet = 0;
        self.inner.teilnehmer.iter().for_each(|entry| {
            if entry.value().senden(nachricht.clone()) {
                gesendet += 1;
            }
        });
        gesendet
    }

    /// Anzahl der registrierten Teilnehmer
    pub fn anzahl(&self) -> usize {
        self.inner.teilnehmer.len()
    }

    /// Prueft ob eine Sitzung registriert ist
    pub fn ist_registriert(&self, sitzung: &SitzungsId) -> bool {
        self.inner.teilnehmer.contains_key(sitzung)
    }
}

impl Default for RaumVersand {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use werkraum_core::delta::RaumDelta;

    fn test_nachricht(sitzung: SitzungsId) -> RaumNachricht {
        RaumNachricht::delta(RaumDelta::TeilnehmerEntfernt { sitzung })
    }

    #[tokio::test]
    async fn registrieren_und_senden() {
        let versand = RaumVersand::neu();
        let sid = SitzungsId::new();

        let mut rx = versand.registrieren(sid);
        assert!(versand.ist_registriert(&sid));

        let gesendet = versand.an_sitzung_senden(&sid, test_nachricht(sid));
        assert!(gesendet);

        let empfangen = rx.try_recv().expect("Nachricht muss vorhanden sein");
        assert!(matches!(
            empfangen.payload,
            werkraum_protocol::RaumPayload::Delta(_)
        ));
    }

    #[tokio::test]
    async fn an_alle_senden_erreicht_jeden() {
        let versand = RaumVersand::neu();

        let sids: Vec<SitzungsId> = (0..5).map(|_| SitzungsId::new()).collect();
        let mut receivers: Vec<_> = sids.iter().map(|sid| versand.registrieren(*sid)).collect();

        let gesendet = versand.an_alle_senden(test_nachricht(sids[0]));
        assert_eq!(gesendet, 5);

        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn volle_queue_verwirft_statt_zu_blockieren() {
        let versand = RaumVersand::neu();
        let sid = SitzungsId::new();
        let _rx = versand.registrieren(sid);

        // Queue bis zum Rand fuellen
        for _ in 0..SEND_QUEUE_GROESSE {
            assert!(versand.an_sitzung_senden(&sid, test_nachricht(sid)));
        }
        // Die naechste Sendung wird verworfen
        assert!(!versand.an_sitzung_senden(&sid, test_nachricht(sid)));
    }

    #[tokio::test]
    async fn entfernen_beendet_zustellung() {
        let versand = RaumVersand::neu();
        let sid = SitzungsId::new();
        let _rx = versand.registrieren(sid);

        versand.entfernen(&sid);
        assert!(!versand.ist_registriert(&sid));
        assert!(!versand.an_sitzung_senden(&sid, test_nachricht(sid)));
    }
}
