use std::cell::RefCell;
use std::env;
use std::process;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use tinywire::config::{DiscoveryConfig, LinkConfig, SessionConfig, StackConfig};
use tinywire::sched::{NetTask, Scheduler};
use tinywire::session::{
    DiscoveryProtocol, LinkProtocol, SessionClient, TcpConnector, UdpConnector,
};
use tinywire::tcp::SocketHandler;
use tinywire::{Clock, Endpoint, Stack, SystemClock, Tun};

/// Answers every segment with the same bytes.
struct Echo;

impl SocketHandler for Echo {
    fn on_accepted(&mut self, remote: Endpoint) {
        info!("echo: {} connected", remote);
    }

    fn on_received(&mut self, remote: Endpoint, payload: &[u8]) -> Option<Vec<u8>> {
        info!("echo: {} bytes from {}", payload.len(), remote);
        Some(payload.to_vec())
    }

    fn on_disconnected(&mut self, remote: Endpoint) {
        info!("echo: {} gone", remote);
    }
}

fn var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={:?}", name, raw);
            None
        }
    }
}

fn main() {
    env_logger::init();

    let iface = env::var("TINYWIRE_IFACE").unwrap_or_else(|_| "tun0".to_string());
    let device = match Tun::new(&iface) {
        Ok(dev) => dev,
        Err(e) => {
            error!("cannot open {}: {}", iface, e);
            process::exit(2);
        }
    };

    let mut stack_config = StackConfig::default();
    if let Some(addr) = var("TINYWIRE_ADDR") {
        stack_config.local_addr = addr;
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stack = Rc::new(RefCell::new(Stack::new(
        Box::new(device),
        clock.clone(),
        stack_config,
    )));

    let echo_port: u16 = var("TINYWIRE_ECHO_PORT").unwrap_or(7);
    {
        let mut s = stack.borrow_mut();
        match s.listen(echo_port) {
            Ok(h) => {
                if let Err(e) = s.set_handler(h, Box::new(Echo)) {
                    warn!("echo handler: {}", e);
                }
            }
            Err(e) => warn!("echo listener: {}", e),
        }
    }

    let mut sched = Scheduler::new(clock.clone());
    sched.add(Box::new(NetTask::new(stack.clone(), Duration::from_millis(1))));

    if let Some(server) = var::<Endpoint>("TINYWIRE_SERVER") {
        let link = LinkConfig {
            server,
            user: env::var("TINYWIRE_USER").unwrap_or_default(),
            password: env::var("TINYWIRE_PASSWORD").unwrap_or_default(),
        };
        let mut session = SessionConfig::link();
        if let Some(ms) = var::<u64>("TINYWIRE_MAX_NOT_ACTIVE_MS") {
            session.max_not_active = Duration::from_millis(ms);
        }
        let client = SessionClient::new(
            "link",
            clock.clone(),
            session,
            TcpConnector::new(stack.clone(), link.server),
            LinkProtocol::new(&link),
        );
        info!("link client for {}", link.server);
        sched.add(Box::new(client));
    }

    if let Some(port) = var::<u16>("TINYWIRE_DISCOVERY_PORT") {
        let discovery = DiscoveryConfig {
            port,
            device_type: var("TINYWIRE_DEVICE_TYPE").unwrap_or(0),
            ..DiscoveryConfig::default()
        };
        let client = SessionClient::new(
            "discovery",
            clock.clone(),
            SessionConfig::discovery(),
            UdpConnector::new(stack.clone(), discovery.port),
            DiscoveryProtocol::new(&discovery),
        );
        sched.add(Box::new(client));
    }

    sched.run(Duration::from_millis(1));

    // only a reboot request ends the loop
    error!("reboot requested, exiting");
    process::exit(1);
}
