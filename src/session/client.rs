use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use super::{Connector, Context, Event, Protocol, Status, Transport};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::sched::{Outcome, Task};
use crate::Clock;

/// Handler for messages on an application route.
pub type Route = Box<dyn FnMut(&[u8])>;

/// Keeps one session alive: creates the transport, logs in, pings, and
/// tears everything down when the peer stops answering.
pub struct SessionClient<C: Connector, P: Protocol> {
    name: String,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    connector: C,
    protocol: P,
    master: Option<C::Link>,
    status: Status,
    /// Creation time; uptime and the reboot watchdog count from here.
    epoch: Instant,
    login_time: Option<Instant>,
    last_send: Option<Instant>,
    last_active: Option<Instant>,
    /// Smoothed heartbeat round trip.
    delay: Duration,
    key: Option<String>,
    /// Server wall clock minus ours, in ms.
    time_offset: i64,
    interval: Duration,
    rx: Vec<u8>,
    routes: HashMap<String, Route>,
}

impl<C: Connector, P: Protocol> SessionClient<C, P> {
    pub fn new(
        name: &str,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        connector: C,
        protocol: P,
    ) -> Self {
        let epoch = clock.now();
        let interval = config.idle_interval;
        Self {
            name: name.to_string(),
            clock,
            config,
            connector,
            protocol,
            master: None,
            status: Status::Idle,
            epoch,
            login_time: None,
            last_send: None,
            last_active: None,
            delay: Duration::ZERO,
            key: None,
            time_offset: 0,
            interval,
            rx: Vec::new(),
            routes: HashMap::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Session key handed out at login.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn login_time(&self) -> Option<Instant> {
        self.login_time
    }

    pub fn last_active(&self) -> Option<Instant> {
        self.last_active
    }

    pub fn link(&self) -> Option<&C::Link> {
        self.master.as_ref()
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Call `handler` for every message on `route` (case-insensitive).
    pub fn route<F>(&mut self, route: &str, handler: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.routes
            .insert(route.to_ascii_lowercase(), Box::new(handler));
    }

    pub fn uptime_ms(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_millis() as u64
    }

    /// Wall clock in ms, corrected by the last server time seen.
    pub fn wall_ms(&self) -> u64 {
        (self.clock.unix_ms() as i64).saturating_add(self.time_offset).max(0) as u64
    }

    fn context(&self) -> Context {
        Context {
            uptime_ms: self.uptime_ms(),
            wall_ms: self.wall_ms(),
        }
    }

    /// One scheduler round.
    pub fn tick(&mut self) -> Outcome {
        let now = self.clock.now();
        if !self.config.max_not_active.is_zero() {
            let last = self.last_active.unwrap_or(self.epoch);
            if now.duration_since(last) > self.config.max_not_active {
                error!(
                    "{}: nothing received for {:?}, rebooting",
                    self.name,
                    now.duration_since(last)
                );
                return Outcome::Reboot;
            }
        }

        self.check_net();
        if self.master.is_none() {
            return Outcome::Continue;
        }
        self.pump();

        match self.status {
            Status::Idle => match self.protocol.hello() {
                Some(Ok(frame)) => {
                    if self.send(&frame).is_err() {
                        return Outcome::Continue;
                    }
                }
                Some(Err(e)) => warn!("{}: hello: {}", self.name, e),
                None => self.login(),
            },
            Status::Handshaken => self.login(),
            Status::LoggedIn => self.ping(false),
        }
        Outcome::Continue
    }

    /// Make sure a transport exists and is still linked.
    pub fn check_net(&mut self) {
        match self.master.as_ref().map(|link| link.linked()) {
            None => match self.connector.connect() {
                Ok(link) => {
                    info!("{}: transport up", self.name);
                    self.master = Some(link);
                    self.interval = self.config.linked_interval;
                }
                Err(e) => debug!("{}: no transport: {}", self.name, e),
            },
            Some(false) => {
                warn!("{}: link down, dropping transport", self.name);
                self.teardown();
                self.interval = self.config.idle_interval;
            }
            Some(true) => {}
        }
    }

    fn teardown(&mut self) {
        self.master = None;
        self.rx.clear();
        self.protocol.reset();
        if self.status != Status::Idle {
            info!("{}: {} --> {}", self.name, self.status, Status::Idle);
        }
        self.status = Status::Idle;
    }

    /// Send a ready-made frame on the current transport.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        let Some(link) = self.master.as_mut() else {
            return Err(Error::NotConnected);
        };
        match link.send(frame) {
            Ok(()) => {
                self.last_send = Some(self.clock.now());
                Ok(())
            }
            Err(e) => {
                warn!("{}: send failed: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Read everything the transport has and act on each complete message.
    pub fn pump(&mut self) {
        let Some(link) = self.master.as_mut() else {
            return;
        };
        while let Some(bytes) = link.recv() {
            self.rx.extend_from_slice(&bytes);
        }

        loop {
            match self.protocol.decode(&self.rx) {
                Ok(Some((event, used))) => {
                    self.rx.drain(..used);
                    self.last_active = Some(self.clock.now());
                    self.on_event(event);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{}: discarding {} bytes: {}", self.name, self.rx.len(), e);
                    self.rx.clear();
                    break;
                }
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        trace!("{}: {:?}", self.name, event);
        match event {
            Event::Handshake => {
                if self.status == Status::Idle {
                    self.advance(Status::Handshaken);
                }
                if let Some(link) = self.master.as_mut() {
                    link.pin_peer();
                }
            }
            Event::LoggedIn { key } => {
                if self.status == Status::Idle {
                    self.advance(Status::Handshaken);
                }
                self.key = key;
                self.on_logged_in();
            }
            Event::LoginRejected { reason } => {
                warn!("{}: login rejected: {}", self.name, reason);
                self.status = Status::Idle;
            }
            Event::Pong {
                echo_ms,
                server_time,
            } => self.on_pong(echo_ms, server_time),
            Event::Other { route, body } => match self.routes.get_mut(&route.to_ascii_lowercase()) {
                Some(handler) => handler(&body),
                None => debug!("{}: no route for {:?}", self.name, route),
            },
            Event::Ignored => {}
        }
    }

    fn advance(&mut self, next: Status) {
        info!("{}: {} --> {}", self.name, self.status, next);
        self.status = next;
    }

    fn on_logged_in(&mut self) {
        if self.status != Status::LoggedIn {
            self.advance(Status::LoggedIn);
        }
        self.login_time = Some(self.clock.now());
        self.interval = self.config.active_interval;
    }

    /// Send the login request, wait for it to settle, then push one heartbeat.
    pub fn login(&mut self) {
        let ctx = self.context();
        match self.protocol.login(&ctx) {
            Ok(Some(frame)) => {
                if self.send(&frame).is_err() {
                    return;
                }
                if !self.config.settle.is_zero() {
                    self.clock.sleep(self.config.settle);
                }
                self.pump();
            }
            Ok(None) => {
                // nothing to authenticate
                if self.status == Status::Idle {
                    self.advance(Status::Handshaken);
                }
                self.on_logged_in();
            }
            Err(e) => {
                warn!("{}: login: {}", self.name, e);
                return;
            }
        }
        if self.status == Status::LoggedIn {
            self.ping(true);
        }
    }

    /// Heartbeat. Drops the session when the peer has been silent too long;
    /// otherwise skipped if anything was sent recently, unless `force`d.
    pub fn ping(&mut self, force: bool) {
        let now = self.clock.now();
        if let Some(last) = self.last_active {
            if now.duration_since(last) > self.config.stale_after {
                warn!(
                    "{}: no answer for {:?}, starting over",
                    self.name,
                    now.duration_since(last)
                );
                self.teardown();
                self.interval = self.config.linked_interval;
                return;
            }
        }

        if !force && !self.config.ping_quiet.is_zero() {
            if let Some(sent) = self.last_send {
                if now.duration_since(sent) < self.config.ping_quiet {
                    trace!("{}: sent recently, ping skipped", self.name);
                    return;
                }
            }
        }

        let ctx = self.context();
        let frame = match self.protocol.ping(&ctx) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}: ping: {}", self.name, e);
                return;
            }
        };
        if self.send(&frame).is_err() {
            return;
        }
        trace!("{}: ping sent", self.name);
    }

    /// Fold one heartbeat round trip into the smoothed delay.
    pub fn on_pong(&mut self, echo_ms: Option<u64>, server_time: Option<u64>) {
        if let Some(sent) = echo_ms {
            let cost = Duration::from_millis(self.uptime_ms().saturating_sub(sent));
            self.delay = if self.delay.is_zero() {
                cost
            } else {
                (self.delay + cost) / 2
            };
            debug!(
                "{}: heartbeat delay {}ms / {}ms",
                self.name,
                cost.as_millis(),
                self.delay.as_millis()
            );
        }

        // server time is in seconds; small values are uptimes, not dates
        if let Some(secs) = server_time.filter(|&t| t > 1000) {
            let server_ms = secs.saturating_mul(1000) as i64;
            self.time_offset = server_ms - self.clock.unix_ms() as i64;
            debug!("{}: clock offset now {}ms", self.name, self.time_offset);
        }
    }
}

impl<C: Connector, P: Protocol> Task for SessionClient<C, P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self) -> Outcome {
        self.tick()
    }
}
