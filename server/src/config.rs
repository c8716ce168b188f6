//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Chat-Verlauf-Einstellungen
    pub verlauf: VerlaufEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Standard-Kapazitaet neuer Raeume
    pub standard_kapazitaet: u32,
    /// Terminals pro neuem Raum
    pub terminals: usize,
    /// Tafeln pro neuem Raum
    pub tafeln: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Werkraum Server".into(),
            standard_kapazitaet: 16,
            terminals: 5,
            tafeln: 3,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Steuerkanal
    pub bind_adresse: String,
    /// Port fuer den Steuerkanal
    pub tcp_port: u16,
    /// Intervall zwischen Server-Pings in Sekunden
    pub keepalive_sek: u64,
    /// Maximale Stille in Sekunden bevor eine Verbindung getrennt wird
    pub timeout_sek: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9460,
            keepalive_sek: 15,
            timeout_sek: 45,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Chat-Verlauf-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerlaufEinstellungen {
    /// Backend: "none" (kein Verlauf) oder "memory" (prozesslokal)
    pub backend: String,
}

impl Default for VerlaufEinstellungen {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer den Steuerkanal zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.standard_kapazitaet, 16);
        assert_eq!(cfg.server.terminals, 5);
        assert_eq!(cfg.server.tafeln, 3);
        assert_eq!(cfg.netzwerk.tcp_port, 9460);
        assert_eq!(cfg.verlauf.backend, "memory");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adresse() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse(), "0.0.0.0:9460");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Atelier"
            standard_kapazitaet = 8

            [netzwerk]
            tcp_port = 10000

            [verlauf]
            backend = "none"
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Atelier");
        assert_eq!(cfg.server.standard_kapazitaet, 8);
        assert_eq!(cfg.netzwerk.tcp_port, 10000);
        assert_eq!(cfg.verlauf.backend, "none");
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.keepalive_sek, 15);
        assert_eq!(cfg.server.tafeln, 3);
    }
}
