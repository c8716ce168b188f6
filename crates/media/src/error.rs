//! Fehlertypen des Medien-Mesh

use thiserror::Error;
use werkraum_core::types::SitzungsId;

/// Alle moeglichen Fehler des Medien-Mesh
#[derive(Debug, Error)]
pub enum MedienError {
    #[error("Capture-Quelle nicht verfuegbar: {0}")]
    QuelleNichtVerfuegbar(String),

    #[error("Keine Capture-Quelle erfasst")]
    QuelleFehlt,

    #[error("Verhandlung mit {peer} fehlgeschlagen: {grund}")]
    Verhandlung { peer: SitzungsId, grund: String },

    #[error("Eingehender Anruf bei deaktivierten Medien abgelehnt")]
    MedienInaktiv,
}

pub type MedienResult<T> = Result<T, MedienError>;
