//! Wire-Format fuer den Steuerkanal
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).
//!
//! Ein Frame mit ungueltigem JSON wird geloggt und uebersprungen, die
//! Verbindung bleibt bestehen; die Frame-Grenzen bleiben durch das
//! Laengen-Feld intakt. Nur ein ueberlanger Frame ist ein harter Fehler,
//! weil dahinter keine verlaessliche Frame-Grenze mehr existiert.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::RaumNachricht;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer den frame-basierten Steuerkanal
///
/// Implementiert `Encoder<RaumNachricht>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = RaumNachricht;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
            if src.len() < LENGTH_FIELD_SIZE {
                return Ok(None);
            }

            // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
            let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

            // Maximale Frame-Groesse pruefen
            if length > self.max_frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                        length, self.max_frame_size
                    ),
                ));
            }

            // Pruefen ob der vollstaendige Frame bereits im Buffer ist
            let total_size = LENGTH_FIELD_SIZE + length;
            if src.len() < total_size {
                // Speicher vorbelegen um Reallocations zu vermeiden
                src.reserve(total_size - src.len());
                return Ok(None);
            }

            // Laengen-Feld verbrauchen
            src.advance(LENGTH_FIELD_SIZE);

            // Payload-Bytes extrahieren
            let payload = src.split_to(length);

            // JSON deserialisieren; ein fehlerhafter Frame wird
            // uebersprungen statt die Verbindung zu trennen
            match serde_json::from_slice::<RaumNachricht>(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    tracing::debug!(fehler = %e, bytes = length, "Fehlerhafter Frame verworfen");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<RaumNachricht> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RaumNachricht, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // JSON serialisieren
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        // Groesse pruefen
        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        // Laengen-Feld + Payload schreiben
        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RaumPayload;

    fn test_ping_nachricht(request_id: u32) -> RaumNachricht {
        RaumNachricht::ping(request_id, 999888777)
    }

    #[test]
    fn frame_codec_encode_decode_round_trip() {
        let mut codec = FrameCodec::new();
        let original = test_ping_nachricht(42);

        // Kodieren
        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        // Laengen-Feld pruefen
        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert!(payload_len > 0);
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        // Dekodieren
        let decoded = codec
            .decode(&mut buf)
            .unwrap()
            .expect("Muss eine Nachricht enthalten");
        assert_eq!(decoded.request_id, 42);
        assert!(matches!(decoded.payload, RaumPayload::Ping(_)));
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = FrameCodec::new();
        let original = test_ping_nachricht(1);

        let mut buf = BytesMut::new();
        codec.encode(original, &mut buf).unwrap();

        // Nur die Haelfte der Bytes behalten
        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);

        // Sollte None zurueckgeben (wartet auf mehr Daten)
        let result = codec.decode(&mut partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn frame_codec_zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::with_max_size(100);

        // Frame-Laenge von 200 Bytes im Buffer simulieren
        let mut buf = BytesMut::new();
        buf.put_u32(200); // 200 Bytes Payload
        buf.put_slice(&[b'x'; 200]);

        let result = codec.decode(&mut buf);
        assert!(result.is_err());
    }

    #[test]
    fn frame_codec_ueberspringt_ungueltiges_json() {
        let mut codec = FrameCodec::new();
        let kaputt = b"kein json";

        let mut buf = BytesMut::new();
        buf.put_u32(kaputt.len() as u32);
        buf.put_slice(kaputt);

        // Der kaputte Frame wird konsumiert, es folgt keine Nachricht
        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_ueberspringt_und_liest_naechsten_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // Kaputter Frame gefolgt von einem gueltigen
        let kaputt = b"{unvollstaendig";
        buf.put_u32(kaputt.len() as u32);
        buf.put_slice(kaputt);
        codec.encode(test_ping_nachricht(7), &mut buf).unwrap();

        let msg = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
        assert_eq!(msg.request_id, 7);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_mehrere_nachrichten_im_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // Drei Nachrichten kodieren
        for i in 0..3u32 {
            codec.encode(test_ping_nachricht(i), &mut buf).unwrap();
        }

        // Alle drei dekodieren
        for i in 0..3u32 {
            let msg = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
            assert_eq!(msg.request_id, i);
        }

        // Buffer muss leer sein
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_default_max_size() {
        let codec = FrameCodec::new();
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }
}
