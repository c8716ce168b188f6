//! Peer-Medien-Mesh des geteilten Werkraums
//!
//! Verwaltet die direkten Medien-Links zwischen ko-praesenten
//! Teilnehmern. Die eigentliche Medien-Engine (Capture, Codec,
//! NAT-Traversal) liegt hinter der Grenzschicht in [`grenze`].

pub mod adresse;
pub mod error;
pub mod grenze;
pub mod mesh;

pub use adresse::adresse_bereinigen;
pub use error::{MedienError, MedienResult};
pub use grenze::{MedienAngebot, MedienSchnittstelle, MedienVerbindung};
pub use mesh::{peer_adresse, praesenz_betreiben, MedienMesh, MeshEreignis};
