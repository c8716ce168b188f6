//! Wiederverwendbare Backoff-Richtlinie
//!
//! Eine einzige Richtlinie fuer alle Wiederholungs-Schleifen: die
//! Verbindungs-Zustandsmaschine des Clients und der Medien-Mesh-Manager
//! teilen sich diese Implementierung statt eigene Varianten zu pflegen.
//!
//! Exponentiell mit Faktor, Obergrenze, maximaler Versuchszahl und
//! austauschbarer Jitter-Funktion.

use std::time::Duration;

/// Jitter-Funktion: bildet eine rohe Verzoegerung auf die tatsaechliche ab
pub type JitterFn = fn(Duration) -> Duration;

/// Voller Jitter: gleichverteilt in `[0, verzoegerung]`
pub fn voller_jitter(verzoegerung: Duration) -> Duration {
    use rand::Rng;
    let ms = verzoegerung.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Kein Jitter (deterministisch, fuer Tests)
pub fn kein_jitter(verzoegerung: Duration) -> Duration {
    verzoegerung
}

/// Exponentielle Backoff-Richtlinie
#[derive(Debug, Clone)]
pub struct BackoffRichtlinie {
    /// Basis-Verzoegerung fuer den ersten Wiederholungsversuch
    pub basis: Duration,
    /// Multiplikator pro weiterem Versuch
    pub faktor: f64,
    /// Obergrenze der rohen Verzoegerung
    pub obergrenze: Duration,
    /// Maximale Anzahl Versuche (inklusive des ersten)
    pub max_versuche: u32,
    /// Jitter-Funktion
    pub jitter: JitterFn,
}

impl BackoffRichtlinie {
    /// Standard-Richtlinie fuer Verbindungsaufbau
    pub fn standard() -> Self {
        Self {
            basis: Duration::from_millis(500),
            faktor: 2.0,
            obergrenze: Duration::from_secs(30),
            max_versuche: 8,
            jitter: voller_jitter,
        }
    }

    /// Deterministische Variante ohne Jitter (fuer Tests)
    pub fn ohne_jitter(mut self) -> Self {
        self.jitter = kein_jitter;
        self
    }

    /// Prueft ob nach `versuch` fehlgeschlagenen Versuchen weiter
    /// wiederholt werden darf
    pub fn darf_wiederholen(&self, versuch: u32) -> bool {
        versuch < self.max_versuche
    }

    /// Verzoegerung vor dem `versuch`-ten Wiederholungsversuch (1-basiert)
    ///
    /// Roh: `basis * faktor^(versuch-1)`, gedeckelt durch `obergrenze`,
    /// anschliessend durch die Jitter-Funktion gestreut.
    pub fn verzoegerung(&self, versuch: u32) -> Duration {
        let exponent = versuch.saturating_sub(1);
        let roh_ms = self.basis.as_millis() as f64 * self.faktor.powi(exponent as i32);
        let gedeckelt = Duration::from_millis(roh_ms.min(self.obergrenze.as_millis() as f64) as u64);
        (self.jitter)(gedeckelt)
    }
}

impl Default for BackoffRichtlinie {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_richtlinie() -> BackoffRichtlinie {
        BackoffRichtlinie {
            basis: Duration::from_millis(100),
            faktor: 2.0,
            obergrenze: Duration::from_millis(1000),
            max_versuche: 4,
            jitter: kein_jitter,
        }
    }

    #[test]
    fn exponentielles_wachstum() {
        let r = test_richtlinie();
        assert_eq!(r.verzoegerung(1), Duration::from_millis(100));
        assert_eq!(r.verzoegerung(2), Duration::from_millis(200));
        assert_eq!(r.verzoegerung(3), Duration::from_millis(400));
    }

    #[test]
    fn obergrenze_deckelt() {
        let r = test_richtlinie();
        assert_eq!(r.verzoegerung(10), Duration::from_millis(1000));
    }

    #[test]
    fn versuchszahl_begrenzt() {
        let r = test_richtlinie();
        assert!(r.darf_wiederholen(0));
        assert!(r.darf_wiederholen(3));
        assert!(!r.darf_wiederholen(4));
        assert!(!r.darf_wiederholen(99));
    }

    #[test]
    fn voller_jitter_bleibt_im_intervall() {
        for _ in 0..50 {
            let d = voller_jitter(Duration::from_millis(500));
            assert!(d <= Duration::from_millis(500));
        }
        assert_eq!(voller_jitter(Duration::ZERO), Duration::ZERO);
    }
}
