//! Prozessweiter Allokator fuer Kollaborationsflaechen-IDs
//!
//! Jede Tafel erhaelt bei Raumerstellung eine Flaechen-ID: 12 Zeichen aus
//! dem festen Alphabet `0-9a-zA-Z`. Die IDs sind prozessweit eindeutig
//! ueber alle lebenden Raeume hinweg; bei Raumaufloesung werden sie wieder
//! freigegeben.
//!
//! Kollisionsbehandlung: "reservieren falls frei" atomar unter einem Lock,
//! bei Kollision wird neu gewuerfelt.

use parking_lot::Mutex;
use std::collections::HashSet;

use werkraum_core::types::FlaechenId;

/// Zeichenvorrat fuer Flaechen-IDs
pub const FLAECHEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Laenge einer Flaechen-ID in Zeichen
pub const FLAECHEN_LAENGE: usize = 12;

/// Wuerfelt einen zufaelligen ID-Kandidaten
fn zufalls_kandidat() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..FLAECHEN_LAENGE)
        .map(|_| FLAECHEN_ALPHABET[rng.random_range(0..FLAECHEN_ALPHABET.len())] as char)
        .collect()
}

/// Prozessweiter Flaechen-Allokator
///
/// Thread-safe; ein Exemplar pro Serverprozess, geteilt ueber `Arc`.
#[derive(Debug, Default)]
pub struct FlaechenAllokator {
    vergeben: Mutex<HashSet<String>>,
}

impl FlaechenAllokator {
    /// Erstellt einen leeren Allokator
    pub fn neu() -> Self {
        Self::default()
    }

    /// Reserviert eine neue, prozessweit eindeutige Flaechen-ID
    pub fn reservieren(&self) -> FlaechenId {
        self.reservieren_mit(zufalls_kandidat)
    }

    /// Reserviert mit austauschbarem Kandidaten-Generator
    ///
    /// Der Generator wird so lange aufgerufen bis ein Kandidat noch nicht
    /// vergeben ist; das Einfuegen geschieht atomar unter dem Lock.
    pub fn reservieren_mit<F: FnMut() -> String>(&self, mut kandidat: F) -> FlaechenId {
        loop {
            let id = kandidat();
            let mut vergeben = self.vergeben.lock();
            if vergeben.insert(id.clone()) {
                return FlaechenId(id);
            }
            drop(vergeben);
            tracing::debug!(kandidat = %id, "Flaechen-ID-Kollision, wuerfle neu");
        }
    }

    /// Gibt eine Flaechen-ID wieder frei
    ///
    /// Gibt `false` zurueck wenn die ID nicht vergeben war.
    pub fn freigeben(&self, id: &FlaechenId) -> bool {
        self.vergeben.lock().remove(&id.0)
    }

    /// Prueft ob eine ID aktuell vergeben ist
    pub fn ist_vergeben(&self, id: &FlaechenId) -> bool {
        self.vergeben.lock().contains(&id.0)
    }

    /// Anzahl aktuell vergebener IDs
    pub fn anzahl_vergeben(&self) -> usize {
        self.vergeben.lock().len()
    }
}
