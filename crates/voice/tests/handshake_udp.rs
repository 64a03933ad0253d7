//! Handshake ueber einen echten UDP-Socket und die Netzwerk-Eventloops

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use parking_lot::Mutex;

use tsvoice_core::{ClientId, SystemClock};
use tsvoice_protocol::init::{antwort_inhalt, client_anfrage, ERGEBNIS_OFFSET, PUZZLE_ZAHL_SIZE};
use tsvoice_protocol::packet::client_paket_bauen;
use tsvoice_protocol::{HandshakeStep, PacketFlags, PacketType};
use tsvoice_voice::{
    CommandHandler, KeinCrypt, Kommando, NetworkEventLoop, Puzzle, PuzzlePool, ServerBausteine, VoiceConfig,
    VoiceConnection, VoiceServer,
};

#[derive(Default)]
struct Mitschnitt {
    kommandos: Mutex<Vec<(ClientId, String)>>,
}

impl CommandHandler for Mitschnitt {
    fn handle_command(&self, verbindung: &Arc<VoiceConnection>, kommando: Kommando) {
        let text = String::from_utf8_lossy(&kommando.daten).into_owned();
        self.kommandos.lock().push((verbindung.client_id(), text));
    }
}

fn empfangen(client: &UdpSocket) -> Vec<u8> {
    let mut puffer = [0u8; 1600];
    let (laenge, _) = client.recv_from(&mut puffer).expect("Antwort vom Server");
    puffer[..laenge].to_vec()
}

fn warten_bis(bedingung: impl Fn() -> bool) -> bool {
    let ende = Instant::now() + Duration::from_secs(5);
    while Instant::now() < ende {
        if bedingung() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn handshake_ueber_loopback_erzeugt_session() {
    let config = VoiceConfig {
        puzzle_level: 16,
        puzzle_pool_groesse: 2,
        event_loops: 2,
        events_per_socket: 2,
        ..VoiceConfig::default()
    };
    let pool = Arc::new(PuzzlePool::neu(config.puzzle_level, config.puzzle_pool_groesse));
    pool.vorberechnen();
    let event_loop = NetworkEventLoop::starten(config.event_loops).unwrap();
    let mitschnitt = Arc::new(Mitschnitt::default());

    let server = VoiceServer::neu(
        config,
        pool,
        Arc::clone(&event_loop),
        ServerBausteine {
            crypt: Arc::new(KeinCrypt),
            kommandos: mitschnitt.clone(),
            clock: Arc::new(SystemClock),
            wiedergabe: None,
        },
    );
    let ziel: SocketAddr = server.binden("127.0.0.1:0".parse().unwrap()).unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    // COOKIE_GET
    let mut rest = vec![0u8; 16];
    rest[4..8].copy_from_slice(&[0xA1, 0xB2, 0xC3, 0xD4]);
    client
        .send_to(&client_anfrage(1, HandshakeStep::CookieGet, &rest), ziel)
        .unwrap();
    let cookie_set = empfangen(&client);
    let inhalt = antwort_inhalt(&cookie_set).unwrap().to_vec();
    assert_eq!(inhalt[0], HandshakeStep::CookieSet as u8);
    assert_eq!(&inhalt[17..21], &[0xD4, 0xC3, 0xB2, 0xA1]);

    // PUZZLE_GET mit Cookie
    let mut rest = inhalt[1..17].to_vec();
    rest.extend_from_slice(&[0; 4]);
    client
        .send_to(&client_anfrage(1, HandshakeStep::PuzzleGet, &rest), ziel)
        .unwrap();
    let puzzle_set = empfangen(&client);
    let inhalt = antwort_inhalt(&puzzle_set).unwrap().to_vec();
    assert_eq!(inhalt.len(), 233);

    // Loesen
    let x = BigUint::from_bytes_be(&inhalt[1..1 + PUZZLE_ZAHL_SIZE]);
    let n = BigUint::from_bytes_be(&inhalt[1 + PUZZLE_ZAHL_SIZE..1 + 2 * PUZZLE_ZAHL_SIZE]);
    let level_roh = &inhalt[1 + 2 * PUZZLE_ZAHL_SIZE..1 + 2 * PUZZLE_ZAHL_SIZE + 4];
    let level = u32::from_le_bytes([level_roh[0], level_roh[1], level_roh[2], level_roh[3]]);
    assert_eq!(level, 16);
    let loesung = Puzzle::loesen(&x, &n, level).to_bytes_be();
    let mut ergebnis = vec![0u8; PUZZLE_ZAHL_SIZE - loesung.len()];
    ergebnis.extend_from_slice(&loesung);

    let mut rest = inhalt[1..].to_vec();
    rest.resize(ERGEBNIS_OFFSET - 5, 0);
    rest.extend_from_slice(&ergebnis);
    rest.extend_from_slice(b"clientinitiv alpha=AAAA omega=BBBB");
    client
        .send_to(&client_anfrage(1, HandshakeStep::PuzzleSolve, &rest), ziel)
        .unwrap();

    assert!(warten_bis(|| server.sessions_anzahl() == 1));
    assert!(warten_bis(|| !mitschnitt.kommandos.lock().is_empty()));
    let (client_id, text) = mitschnitt.kommandos.lock()[0].clone();
    assert!(client_id.ist_zugewiesen());
    assert_eq!(text, "clientinitiv alpha=AAAA omega=BBBB");

    // Session-Paket ueber die Adresse zugeordnet: PING -> PONG
    let ping = client_paket_bauen(PacketType::Ping, PacketFlags::UNENCRYPTED, 7, 0, &[]);
    client.send_to(&ping, ziel).unwrap();
    let pong = empfangen(&client);
    assert_eq!(pong[10] & 0x0F, PacketType::Pong as u8);
    assert_eq!(&pong[11..13], &7u16.to_be_bytes());

    assert!(server.statistik().snapshot().handshakes_abgeschlossen >= 1);
    server.herunterfahren();
    event_loop.stoppen();
}
