//! Medien-Grenzschicht
//!
//! Der Mesh-Manager kennt nur diese Traits; ICE/STUN-Aequivalente,
//! Codecs und Renderziele leben unterhalb davon. Tests haengen eine
//! Attrappe ein, die echte Implementierung eine native Medien-Engine.

use std::future::Future;

use crate::error::MedienResult;

/// Eingehendes Verbindungsangebot eines Peers
#[derive(Debug, Clone)]
pub struct MedienAngebot {
    /// Bereinigte Adresse des Anrufers
    pub von: String,
}

/// Ein offener Medien-Link zu genau einem Peer
pub trait MedienVerbindung: Send + 'static {
    type Quelle;

    /// Tauscht die Capture-Quelle ohne Neuverhandlung aus
    fn quelle_ersetzen(&mut self, quelle: Self::Quelle) -> MedienResult<()>;

    /// Schliesst den Link und gibt das Renderziel frei
    fn schliessen(&mut self);
}

/// Herstellung von Capture-Quellen und Peer-Links
pub trait MedienSchnittstelle: Send + Sync + 'static {
    type Quelle: Clone + Send + Sync + 'static;
    type Verbindung: MedienVerbindung<Quelle = Self::Quelle>;

    /// Erfasst eine frische Capture-Quelle (Kamera, Bildschirm)
    fn quelle_erfassen(&self) -> impl Future<Output = MedienResult<Self::Quelle>> + Send;

    /// Ruft den Peer unter der bereinigten Adresse an
    fn anrufen(
        &self,
        adresse: &str,
        quelle: Self::Quelle,
    ) -> impl Future<Output = MedienResult<Self::Verbindung>> + Send;

    /// Nimmt ein eingehendes Angebot an
    fn annehmen(
        &self,
        angebot: &MedienAngebot,
        quelle: Self::Quelle,
    ) -> impl Future<Output = MedienResult<Self::Verbindung>> + Send;
}
