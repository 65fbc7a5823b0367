//! Peer discovery over broadcast: find a server, take the address and
//! password it hands out, then keep it alive with empty pings.

use log::{debug, info};

use super::envelope::{Envelope, Sequence};
use super::{Context, Event, Protocol};
use crate::config::DiscoveryConfig;
use crate::error::Result;

pub const CODE_DISCOVER: u8 = 1;
pub const CODE_PING: u8 = 2;

pub struct DiscoveryProtocol {
    device_type: u16,
    system_id: [u8; 20],
    seq: Sequence,
    /// Sequence of the last discover request; other replies are not ours.
    pending: Option<u8>,
    address: Option<u8>,
    password: Option<[u8; 8]>,
}

impl DiscoveryProtocol {
    pub fn new(config: &DiscoveryConfig) -> Self {
        DiscoveryProtocol {
            device_type: config.device_type,
            system_id: config.system_id,
            seq: Sequence::default(),
            pending: None,
            address: None,
            password: None,
        }
    }

    /// Address assigned by the server.
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn password(&self) -> Option<[u8; 8]> {
        self.password
    }

    fn on_discover(&mut self, env: &Envelope) -> Event {
        if !env.is_reply() || env.is_error() || self.pending != Some(env.seq) {
            debug!("discovery: discover #{} ignored", env.seq);
            return Event::Ignored;
        }
        self.pending = None;

        let body = &env.payload;
        self.address = body.first().copied();
        self.password = body.get(1..9).and_then(|b| b.try_into().ok());
        info!(
            "discovery: server assigned address {:?}",
            self.address.unwrap_or_default()
        );
        Event::Handshake
    }
}

impl Protocol for DiscoveryProtocol {
    fn hello(&mut self) -> Option<Result<Vec<u8>>> {
        let mut body = Vec::with_capacity(22);
        body.extend_from_slice(&self.device_type.to_be_bytes());
        body.extend_from_slice(&self.system_id);

        let seq = self.seq.next();
        self.pending = Some(seq);
        Some(Envelope::request(CODE_DISCOVER, seq, body).encode())
    }

    fn login(&mut self, _ctx: &Context) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn ping(&mut self, _ctx: &Context) -> Result<Vec<u8>> {
        Envelope::request(CODE_PING, self.seq.next(), Vec::new()).encode()
    }

    fn decode(&mut self, buf: &[u8]) -> Result<Option<(Event, usize)>> {
        let Some((env, used)) = Envelope::decode(buf)? else {
            return Ok(None);
        };
        let event = match env.code {
            CODE_DISCOVER => self.on_discover(&env),
            CODE_PING if env.is_reply() => Event::Pong {
                echo_ms: None,
                server_time: None,
            },
            CODE_PING => Event::Other {
                route: "ping".to_string(),
                body: env.payload,
            },
            other => Event::Other {
                route: other.to_string(),
                body: env.payload,
            },
        };
        Ok(Some((event, used)))
    }

    fn reset(&mut self) {
        self.pending = None;
        self.address = None;
        self.password = None;
    }
}
