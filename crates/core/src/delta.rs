//! Zustands-Deltas – inkrementelle Beschreibungen einzelner Mutationen
//!
//! Jede Mutation am replizierten Raumzustand wird als genau ein Delta
//! beschrieben und in Mutationsreihenfolge an alle admittierten Teilnehmer
//! verteilt. Geschlossene, getypte Varianten pro mutierbarem Feld – keine
//! dynamischen Feldnamen-Strings.

use serde::{Deserialize, Serialize};

use crate::state::{ChatEintrag, Teilnehmer};
use crate::types::{ObjektId, SitzungsId};

/// Ein inkrementelles Zustands-Delta
///
/// Alle verbundenen Replikate konvergieren zum selben Zustandswert, wenn
/// sie denselben geordneten Delta-Strom via [`crate::RaumZustand::anwenden`]
/// anwenden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaumDelta {
    /// Ein Teilnehmer wurde admittiert
    TeilnehmerHinzugefuegt { teilnehmer: Teilnehmer },
    /// Ein Teilnehmer hat den Raum verlassen (Verbindungsverlust inklusive)
    TeilnehmerEntfernt { sitzung: SitzungsId },
    /// Position und Animations-Tag eines Teilnehmers
    PositionGeaendert {
        sitzung: SitzungsId,
        x: f32,
        y: f32,
        anim: String,
    },
    /// Anzeigename eines Teilnehmers
    NameGeaendert { sitzung: SitzungsId, name: String },
    /// Medien-Opt-in-Flag (`readyForMedia`)
    MedienBereitGeaendert { sitzung: SitzungsId, bereit: bool },
    /// Medien-Aktiv-Flag (`mediaActive`)
    MedienAktivGeaendert { sitzung: SitzungsId, aktiv: bool },
    /// Teilnehmer hat sich an ein geteiltes Objekt angeheftet
    ObjektAngeheftet {
        objekt: ObjektId,
        sitzung: SitzungsId,
    },
    /// Teilnehmer hat sich von einem geteilten Objekt geloest
    ObjektGeloest {
        objekt: ObjektId,
        sitzung: SitzungsId,
    },
    /// Chat-Eintrag wurde angehaengt (Verdraengung des aeltesten Eintrags
    /// bei vollem Log ist in der Anwendung des Deltas enthalten)
    ChatAngehaengt { eintrag: ChatEintrag },
}

impl RaumDelta {
    /// Gibt die Sitzung zurueck auf die sich das Delta bezieht (falls eine)
    pub fn sitzung(&self) -> Option<SitzungsId> {
        match self {
            Self::TeilnehmerHinzugefuegt { teilnehmer } => Some(teilnehmer.sitzung),
            Self::TeilnehmerEntfernt { sitzung }
            | Self::PositionGeaendert { sitzung, .. }
            | Self::NameGeaendert { sitzung, .. }
            | Self::MedienBereitGeaendert { sitzung, .. }
            | Self::MedienAktivGeaendert { sitzung, .. }
            | Self::ObjektAngeheftet { sitzung, .. }
            | Self::ObjektGeloest { sitzung, .. } => Some(*sitzung),
            Self::ChatAngehaengt { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_ist_serde_kompatibel() {
        let delta = RaumDelta::NameGeaendert {
            sitzung: SitzungsId::new(),
            name: "anna".into(),
        };
        let json = serde_json::to_string(&delta).unwrap();
        let zurueck: RaumDelta = serde_json::from_str(&json).unwrap();
        assert_eq!(delta, zurueck);
    }

    #[test]
    fn sitzungs_zuordnung() {
        let sid = SitzungsId::new();
        let delta = RaumDelta::MedienBereitGeaendert {
            sitzung: sid,
            bereit: true,
        };
        assert_eq!(delta.sitzung(), Some(sid));

        let chat = RaumDelta::ChatAngehaengt {
            eintrag: ChatEintrag::neu("anna", "hallo"),
        };
        assert_eq!(chat.sitzung(), None);
    }
}
