//! Client-Seite des geteilten Werkraums
//!
//! Verbindungs-Zustandsmaschine mit automatischer Neuverbindung,
//! schreibgeschuetztes Zustands-Replikat und Transport-Abstraktion.
//! Der Medien-Mesh-Manager haengt sich ueber [`Replik::praesenz_abonnieren`]
//! an die Praesenz-Ereignisse.

pub mod error;
pub mod replik;
pub mod transport;
pub mod verbindung;

pub use error::{ClientError, ClientResult};
pub use replik::{PraesenzEreignis, Replik};
pub use transport::{
    kanal_paar, GegenStelle, TcpTransportFabrik, TransportEreignis, TransportFabrik, TransportPaar,
};
pub use verbindung::{ClientKonfig, RaumZiel, VerbindungsZustand, WerkraumClient};
