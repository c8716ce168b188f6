//! Deterministische Bereinigung von Peer-Adressen
//!
//! Beide Seiten eines Links bilden die Adresse aus derselben Eingabe mit
//! derselben Funktion, sonst findet der Anruf sein Ziel nicht.

/// Ersetzt jedes Zeichen ausserhalb von `0-9a-zA-Z` durch `G`
pub fn adresse_bereinigen(roh: &str) -> String {
    roh.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { 'G' })
        .collect()
}
