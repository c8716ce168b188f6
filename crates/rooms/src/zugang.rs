//! Zugangsgeheimnis-Hashing mit Argon2id
//!
//! Raum-Geheimnisse werden nie im Klartext gehalten: beim Erstellen wird
//! nur der PHC-Hash gespeichert, bei jeder Admission wird gegen diesen
//! Hash verglichen. Argon2id gemaess OWASP-Richtlinien.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};

use crate::error::RaumError;

/// Argon2id-Parameter fuer Geheimnis-Hashing
///
/// Werte gemaess OWASP-Empfehlungen (Stand 2024):
/// - Speicher: 64 MiB
/// - Iterationen: 3
/// - Parallelismus: 1
fn argon2_instanz() -> Argon2<'static> {
    let params = Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 Iterationen
        1,         // p_cost: 1 Thread
        None,      // output_len: Standard (32 Bytes)
    )
    .expect("Argon2-Parameter ungueltig");

    Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params)
}

/// Hasht ein Zugangsgeheimnis mit Argon2id und einem zufaelligen Salt
///
/// Gibt den PHC-String zurueck (inkl. Algorithmus, Parameter und Salt).
pub fn geheimnis_hashen(geheimnis: &str) -> Result<String, RaumError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = argon2_instanz();

    argon2
        .hash_password(geheimnis.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RaumError::Geheimnis(e.to_string()))
}

/// Verifiziert ein Zugangsgeheimnis gegen einen gespeicherten PHC-Hash
///
/// Gibt `true` zurueck wenn das Geheimnis korrekt ist.
pub fn geheimnis_verifizieren(geheimnis: &str, hash: &str) -> Result<bool, RaumError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| RaumError::Geheimnis(format!("Ungueltiges Hash-Format: {e}")))?;

    match argon2_instanz().verify_password(geheimnis.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(RaumError::Geheimnis(e.to_string())),
    }
}
