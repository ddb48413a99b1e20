//! Simulated controller configuration and per-connection session state.

use std::str::FromStr;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use thiserror::Error;

use crate::tag::{TagSpecError, TagStore};

/// Class / instance suffix of the routing path a peer must name in its
/// Forward Open connection path.
const PATH_SUFFIX: [u8; 4] = [0x20, 0x04, 0x24, 0x01];

/// The controller family being impersonated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcKind {
    /// Rack-based controller, addressed through a backplane route.
    ControlLogix,
    /// Flat controller with no backplane.
    Micro800,
}

impl FromStr for PlcKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ControlLogix") {
            Ok(Self::ControlLogix)
        } else if s.eq_ignore_ascii_case("Micro800") {
            Ok(Self::Micro800)
        } else {
            Err(ConfigError::PlcKind(s.to_string()))
        }
    }
}

/// A backplane route, the `--path=<port>,<slot>` pair prefixed to the
/// ControlLogix routing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Backplane port.
    pub port: u8,
    /// Slot number.
    pub slot: u8,
}

impl FromStr for Route {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(',')
            .and_then(|(a, b)| {
                Some(Self {
                    port: a.trim().parse().ok()?,
                    slot: b.trim().parse().ok()?,
                })
            })
            .ok_or_else(|| ConfigError::Route(s.to_string()))
    }
}

/// Immutable per-process simulator state shared by every connection: the
/// controller kind, the expanded routing path, and the tag store.
#[derive(Debug, Clone, PartialEq)]
pub struct Plc {
    kind: PlcKind,
    path: Vec<u8>,
    tags: TagStore,
}

impl Plc {
    /// Build the simulator state.
    ///
    /// ControlLogix requires a [`Route`]; Micro800 rejects one and uses the
    /// fixed 4-byte class/instance path.
    pub fn new(kind: PlcKind, route: Option<Route>, tags: TagStore) -> Result<Self, ConfigError> {
        let path = match (kind, route) {
            (PlcKind::ControlLogix, Some(r)) => {
                let mut p = vec![r.port, r.slot];
                p.extend_from_slice(&PATH_SUFFIX);
                p
            }
            (PlcKind::ControlLogix, None) => return Err(ConfigError::RouteRequired),
            (PlcKind::Micro800, None) => PATH_SUFFIX.to_vec(),
            (PlcKind::Micro800, Some(_)) => return Err(ConfigError::RouteNotAccepted),
        };

        Ok(Self { kind, path, tags })
    }

    /// The controller family.
    pub fn kind(&self) -> PlcKind {
        self.kind
    }

    /// The routing path bytes a Forward Open connection path must match.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// The tags this controller serves.
    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// Mutable tag access, for seeding data values.
    pub fn tags_mut(&mut self) -> &mut TagStore {
        &mut self.tags
    }
}

/// Per-connection protocol state, alive from accept to close.
///
/// All handles and connection identifiers start at zero; a non-zero
/// [`handle`](Self::handle) means RegisterSession completed, and a non-zero
/// [`server_connection_id`](Self::server_connection_id) means a Forward Open
/// is in force.
#[derive(Debug)]
pub struct Session {
    /// Session handle granted by RegisterSession.
    pub handle: u32,
    /// Sender context recorded at RegisterSession and echoed in replies.
    pub sender_context: u64,

    /// Connection id this side allocated at Forward Open.
    pub server_connection_id: u32,
    /// Sequence seed this side allocated at Forward Open.
    pub server_connection_seq: u16,
    /// Connection id the peer presented at Forward Open.
    pub client_connection_id: u32,
    /// Last sequence number seen on a connected request.
    pub client_connection_seq: u16,

    /// Connection serial number from Forward Open.
    pub client_connection_serial: u16,
    /// Originator vendor id from Forward Open.
    pub client_vendor_id: u16,
    /// Originator serial number from Forward Open.
    pub client_serial_number: u32,

    /// Requested packet interval, client to server, microseconds.
    pub client_to_server_rpi: u32,
    /// Requested packet interval, server to client, microseconds.
    pub server_to_client_rpi: u32,
    /// Negotiated client-to-server max packet size.
    pub client_to_server_max_packet: u16,
    /// Negotiated server-to-client max packet size.
    pub server_to_client_max_packet: u16,

    rng: SmallRng,
}

impl Session {
    /// A fresh, unregistered session with its own random generator.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// A session with a deterministic generator, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            handle: 0,
            sender_context: 0,
            server_connection_id: 0,
            server_connection_seq: 0,
            client_connection_id: 0,
            client_connection_seq: 0,
            client_connection_serial: 0,
            client_vendor_id: 0,
            client_serial_number: 0,
            client_to_server_rpi: 0,
            server_to_client_rpi: 0,
            client_to_server_max_packet: 0,
            server_to_client_max_packet: 0,
            rng,
        }
    }

    /// Allocate a random non-zero identifier.
    pub(crate) fn next_id(&mut self) -> u32 {
        loop {
            let id = self.rng.random::<u32>();
            if id != 0 {
                return id;
            }
        }
    }

    /// Allocate a random connection sequence seed.
    pub(crate) fn next_seq(&mut self) -> u16 {
        self.rng.random::<u16>()
    }

    /// Drop the state negotiated by Forward Open.
    pub(crate) fn clear_connection(&mut self) {
        self.server_connection_id = 0;
        self.server_connection_seq = 0;
        self.client_connection_id = 0;
        self.client_connection_seq = 0;
        self.client_connection_serial = 0;
        self.client_vendor_id = 0;
        self.client_serial_number = 0;
        self.client_to_server_rpi = 0;
        self.server_to_client_rpi = 0;
        self.client_to_server_max_packet = 0;
        self.server_to_client_max_packet = 0;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while assembling the simulator configuration.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The `--plc` value names no known controller family.
    #[error("unknown PLC type {0:?}, expected ControlLogix or Micro800")]
    PlcKind(String),

    /// The `--path` value is not two comma-separated integers in 0..=255.
    #[error("invalid path {0:?}, expected <port>,<slot>")]
    Route(String),

    /// ControlLogix needs a backplane route.
    #[error("ControlLogix requires --path")]
    RouteRequired,

    /// Micro800 has no backplane to route through.
    #[error("Micro800 does not accept --path")]
    RouteNotAccepted,

    /// A tag declaration failed to parse or collided with another.
    #[error(transparent)]
    Tag(#[from] TagSpecError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{TagDef, TagType};

    #[test]
    fn test_route_parse() {
        assert_eq!("1,0".parse::<Route>(), Ok(Route { port: 1, slot: 0 }));
        assert_eq!("18, 3".parse::<Route>(), Ok(Route { port: 18, slot: 3 }));
        assert!("1".parse::<Route>().is_err());
        assert!("1,2,3".parse::<Route>().is_err());
        assert!("1,999".parse::<Route>().is_err());
        assert!("a,b".parse::<Route>().is_err());
    }

    #[test]
    fn test_plc_kind_parse() {
        assert_eq!("ControlLogix".parse::<PlcKind>(), Ok(PlcKind::ControlLogix));
        assert_eq!("micro800".parse::<PlcKind>(), Ok(PlcKind::Micro800));
        assert!("SLC500".parse::<PlcKind>().is_err());
    }

    #[test]
    fn test_path_expansion() {
        let plc = Plc::new(PlcKind::Micro800, None, TagStore::new()).unwrap();
        assert_eq!(plc.path(), [0x20, 0x04, 0x24, 0x01]);

        let plc = Plc::new(
            PlcKind::ControlLogix,
            Some(Route { port: 1, slot: 0 }),
            TagStore::new(),
        )
        .unwrap();
        assert_eq!(plc.path(), [0x01, 0x00, 0x20, 0x04, 0x24, 0x01]);

        assert_eq!(
            Plc::new(PlcKind::ControlLogix, None, TagStore::new()),
            Err(ConfigError::RouteRequired)
        );
        assert_eq!(
            Plc::new(
                PlcKind::Micro800,
                Some(Route { port: 1, slot: 0 }),
                TagStore::new()
            ),
            Err(ConfigError::RouteNotAccepted)
        );
    }

    #[test]
    fn test_session_ids_non_zero() {
        let mut session = Session::seeded(7);
        for _ in 0..64 {
            assert_ne!(session.next_id(), 0);
        }
    }

    #[test]
    fn test_clear_connection() {
        let mut session = Session::seeded(1);
        session.handle = 99;
        session.server_connection_id = session.next_id();
        session.client_vendor_id = 0x1234;
        session.clear_connection();

        assert_eq!(session.server_connection_id, 0);
        assert_eq!(session.client_vendor_id, 0);
        // the EIP session itself survives a Forward Close
        assert_eq!(session.handle, 99);
    }

    #[test]
    fn test_store_travels_with_plc() {
        let mut tags = TagStore::new();
        tags.insert(TagDef::new("T", TagType::DINT, &[4]).unwrap())
            .unwrap();
        let plc = Plc::new(PlcKind::Micro800, None, tags).unwrap();
        assert_eq!(plc.tags().find("T").unwrap().elem_count(), 4);
    }
}
