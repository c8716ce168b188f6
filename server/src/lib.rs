//! werkraum-server – Bibliotheks-Root
//!
//! Verdrahtet Raum-Registry und TCP-Listener und stellt den
//! oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use werkraum_rooms::{
    MemoryVerlauf, NullVerlauf, RaumStandards, RaumVerwaltung, VerbindungsKonfig, VerlaufSpeicher,
    WerkraumServer,
};

use config::ServerConfig;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet Registry und TCP-Listener und laeuft bis zum Shutdown-Signal
    ///
    /// Beim Ctrl-C bekommen alle Verbindungen einen Abschied, danach
    /// werden die Raeume heruntergefahren.
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            verlauf = %self.config.verlauf.backend,
            "Server startet"
        );

        match self.config.verlauf.backend.as_str() {
            "none" => laufen(self.config, Arc::new(NullVerlauf)).await,
            "memory" => laufen(self.config, Arc::new(MemoryVerlauf::neu())).await,
            andere => anyhow::bail!("Unbekanntes Verlauf-Backend '{andere}' (none|memory)"),
        }
    }
}

/// Startet die Subsysteme mit dem gewaehlten Verlauf-Backend
async fn laufen<V: VerlaufSpeicher>(config: ServerConfig, verlauf: Arc<V>) -> Result<()> {
    let standards = RaumStandards {
        kapazitaet: config.server.standard_kapazitaet,
        terminals: config.server.terminals,
        tafeln: config.server.tafeln,
    };
    let verwaltung = RaumVerwaltung::neu(verlauf, standards);

    let verbindungs_konfig = VerbindungsKonfig {
        keepalive: Duration::from_secs(config.netzwerk.keepalive_sek),
        timeout: Duration::from_secs(config.netzwerk.timeout_sek),
    };

    let bind_addr: SocketAddr = config
        .tcp_bind_adresse()
        .parse()
        .with_context(|| format!("Ungueltige Bind-Adresse '{}'", config.tcp_bind_adresse()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tcp_server = WerkraumServer::neu(verwaltung.clone(), verbindungs_konfig);
    let server_task = tokio::spawn(tcp_server.starten(bind_addr, shutdown_rx));

    tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
    tokio::signal::ctrl_c()
        .await
        .context("Shutdown-Signal nicht verfuegbar")?;
    tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

    // Accept-Loop beenden, Verbindungen verabschieden, Raeume schliessen
    let _ = shutdown_tx.send(true);
    server_task
        .await
        .context("Server-Task abgebrochen")?
        .context("TCP-Server-Fehler")?;
    verwaltung.herunterfahren().await;

    tracing::info!("Server beendet");
    Ok(())
}
