//! tsvoice-voice – Voice-Transport
//!
//! Bringt Datagramme von der Netzwerkkarte bis in die Session:
//!
//! ## Module
//! - [`puzzle`] – Vorberechnete Zeitschloss-Puzzles
//! - [`handshake`] – Admission-Handshake (`TS3INIT1`)
//! - [`acknowledge`] – Retransmission mit RTO-Schaetzung
//! - [`event_loop`] – Netzwerk-Eventloops (mio, ein OS-Thread pro Loop)
//! - [`socket`] – Zeitbegrenztes Lesen und Schreiben pro Socket
//! - [`connection`] – Session eines Clients
//! - [`server`] – Session-Registry, Wiederverbindung, Adresswechsel
//! - [`driver`] – Periodischer Tick (Resends, Timeouts)

pub mod acknowledge;
pub mod command;
pub mod config;
pub mod connection;
pub mod crypt;
pub mod driver;
pub mod error;
pub mod event_loop;
pub mod handshake;
pub mod puzzle;
pub mod server;
pub mod socket;
pub mod statistics;

pub use acknowledge::{AcknowledgeConfig, AcknowledgeManager};
pub use command::{CommandHandler, Kommando, ProtokollCommandHandler};
pub use config::VoiceConfig;
pub use connection::VoiceConnection;
pub use crypt::{CryptHandler, KeinCrypt};
pub use driver::VoiceDriver;
pub use error::{VoiceError, VoiceResult};
pub use event_loop::{EventHandler, NetworkEventLoop, Rearm};
pub use handshake::{AdmissionHandshake, HandshakeErgebnis};
pub use puzzle::{Puzzle, PuzzlePool};
pub use server::{ServerBausteine, VoiceServer, Wiedergabe};
pub use socket::{DatagramIo, UdpDatagramIo, VoiceServerSocket};
pub use statistics::{StatistikSnapshot, TransportStatistik};
