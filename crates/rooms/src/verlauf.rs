//! Verlaufs-Speicher fuer Chat-Eintraege
//!
//! Schmale Speicher-Abstraktion hinter einem Trait: der Raum-Task ruft den
//! juengsten Verlauf einmalig bei der Initialisierung ab (mit Zeitlimit,
//! Fehler werden toleriert) und persistiert neue Eintraege fire-and-forget.

use std::future::Future;

use dashmap::DashMap;
use werkraum_core::state::ChatEintrag;
use werkraum_core::types::RaumId;

use crate::error::RaumResult;

/// Speicher-Abstraktion fuer den Chat-Verlauf eines Raums
///
/// Implementierungen muessen `Send + Sync` sein, da der Speicher ueber
/// `Arc` von allen Raum-Tasks geteilt wird.
pub trait VerlaufSpeicher: Send + Sync + 'static {
    /// Laedt die juengsten `limit` Eintraege eines Raums (aeltester zuerst)
    fn letzte_eintraege(
        &self,
        raum_id: RaumId,
        limit: usize,
    ) -> impl Future<Output = RaumResult<Vec<ChatEintrag>>> + Send;

    /// Persistiert einen neuen Eintrag
    fn eintrag_speichern(
        &self,
        raum_id: RaumId,
        eintrag: ChatEintrag,
    ) -> impl Future<Output = RaumResult<()>> + Send;

    /// Raeumt den Verlauf eines aufgeloesten Raums auf
    fn raum_aufraeumen(&self, raum_id: RaumId) -> impl Future<Output = RaumResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// NullVerlauf
// ---------------------------------------------------------------------------

/// Verlaufs-Speicher der nichts speichert
///
/// Standard-Backend: Raeume starten immer mit leerem Chat-Log.
#[derive(Debug, Default, Clone)]
pub struct NullVerlauf;

impl VerlaufSpeicher for NullVerlauf {
    async fn letzte_eintraege(&self, _raum_id: RaumId, _limit: usize) -> RaumResult<Vec<ChatEintrag>> {
        Ok(Vec::new())
    }

    async fn eintrag_speichern(&self, _raum_id: RaumId, _eintrag: ChatEintrag) -> RaumResult<()> {
        Ok(())
    }

    async fn raum_aufraeumen(&self, _raum_id: RaumId) -> RaumResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryVerlauf
// ---------------------------------------------------------------------------

/// In-Memory-Verlauf, ueberlebt Raumaufloesung aber keinen Prozess-Neustart
///
/// Nuetzlich fuer Raeume ohne `auto_aufloesen`, deren Verlauf ueber
/// Leerphasen hinweg erhalten bleiben soll.
#[derive(Debug, Default)]
pub struct MemoryVerlauf {
    eintraege: DashMap<RaumId, Vec<ChatEintrag>>,
}

impl MemoryVerlauf {
    pub fn neu() -> Self {
        Self::default()
    }
}

impl VerlaufSpeicher for MemoryVerlauf {
    async fn letzte_eintraege(&self, raum_id: RaumId, limit: usize) -> RaumResult<Vec<ChatEintrag>> {
        Ok(self
            .eintraege
            .get(&raum_id)
            .map(|alle| {
                let start = alle.len().saturating_sub(limit);
                alle[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn eintrag_speichern(&self, raum_id: RaumId, eintrag: ChatEintrag) -> RaumResult<()> {
        self.eintraege.entry(raum_id).or_default().push(eintrag);
        Ok(())
    }

    async fn raum_aufraeumen(&self, raum_id: RaumId) -> RaumResult<()> {
        self.eintraege.remove(&raum_id);
        Ok(())
    }
}
