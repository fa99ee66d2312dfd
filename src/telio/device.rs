//! The device object behind the `Telio` handle
//!
//! Tracks lifecycle, meshnet and exit node state and reports changes as
//! events. Packet processing lives behind [`DataPlane`]; without one the
//! device still accepts configuration and reports state.
//!
//! Events are delivered on a dedicated thread and the data plane is called
//! with the device lock released, so a slow or re-entrant host callback
//! never runs under it.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::callbacks::{TelioEventCb, TelioProtectCb};
use super::error::{TelioError, TelioResult};
use super::keys::{PublicKey, SecretKey};
use super::types::{
    is_valid_ip_net, Config, Event, Features, IpNet, NatType, NodeState, PathType, Peer,
    RelayState, Server, TelioAdapterType, TelioNode,
};

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const PONG: &str = "Pong";

/// How the tunnel interface is obtained on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelSpec {
    Default,
    Named(String),
    Fd(i32),
}

/// Packet processing attached to a device.
pub trait DataPlane: Send + Sync {
    fn start(
        &self,
        _adapter: TelioAdapterType,
        _tunnel: &TunnelSpec,
        _protect: Option<&dyn TelioProtectCb>,
    ) -> TelioResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn nat_type(&self, _ip: IpAddr, _port: u16) -> TelioResult<NatType> {
        Err(TelioError::unknown("NAT detection needs an attached data plane"))
    }

    fn probe_pmtu(&self, _host: IpAddr, _timeout: Duration) -> TelioResult<u32> {
        Err(TelioError::unknown("PMTU probing needs an attached data plane"))
    }

    fn adapter_luid(&self) -> u64 {
        0
    }
}

/// Data plane of a device with no packet processing attached.
#[derive(Debug, Default)]
pub struct DetachedDataPlane;

impl DataPlane for DetachedDataPlane {}

enum Dispatch {
    Event(Event),
    Ping(Sender<String>),
    Flush(Sender<()>),
}

struct Dispatcher {
    tx: Sender<Dispatch>,
    thread: JoinHandle<()>,
}

impl Dispatcher {
    fn spawn(events: Arc<dyn TelioEventCb>) -> TelioResult<Self> {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("telio-events".into())
            .spawn(move || dispatch_loop(rx, events))
            .map_err(|e| TelioError::unknown(format!("failed to spawn event thread: {e}")))?;
        Ok(Self { tx, thread })
    }

    /// Close the queue; pending events are still delivered.
    fn close(self, wait: bool) {
        let Self { tx, thread } = self;
        drop(tx);
        if !wait || thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!("event thread panicked");
        }
    }
}

fn dispatch_loop(rx: Receiver<Dispatch>, events: Arc<dyn TelioEventCb>) {
    for message in rx {
        match message {
            Dispatch::Event(event) => {
                if let Err(e) = events.event(event) {
                    warn!(error = %e, "event callback failed");
                }
            }
            Dispatch::Ping(reply) => {
                let _ = reply.send(PONG.to_string());
            }
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("event thread finished");
}

struct DeviceState {
    running: bool,
    /// The data plane is starting outside the lock.
    starting: bool,
    shut_down: bool,
    secret_key: SecretKey,
    adapter: Option<TelioAdapterType>,
    meshnet: Option<Config>,
    relay: Option<Server>,
    peers: BTreeMap<PublicKey, TelioNode>,
    /// Exit node that is not a meshnet peer.
    vpn: Option<TelioNode>,
    magic_dns: Option<Vec<IpAddr>>,
    fwmark: Option<u32>,
    asleep: bool,
    last_error: String,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            running: false,
            starting: false,
            shut_down: false,
            secret_key: SecretKey::generate(),
            adapter: None,
            meshnet: None,
            relay: None,
            peers: BTreeMap::new(),
            vpn: None,
            magic_dns: None,
            fwmark: None,
            asleep: false,
            last_error: String::new(),
        }
    }

    fn nodes(&self) -> Vec<TelioNode> {
        self.peers.values().chain(self.vpn.iter()).cloned().collect()
    }
}

fn disconnected(mut node: TelioNode) -> Event {
    node.state = NodeState::Disconnected;
    Event::Node(node)
}

fn host_prefix(ip: &IpAddr) -> IpNet {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// A meshnet / VPN device.
pub struct Telio {
    features: Features,
    state: Mutex<DeviceState>,
    dispatcher: Mutex<Option<Dispatcher>>,
    protect: Option<Arc<dyn TelioProtectCb>>,
    data_plane: Box<dyn DataPlane>,
}

impl Telio {
    pub fn new(features: Features, events: Arc<dyn TelioEventCb>) -> TelioResult<Self> {
        Self::build(features, events, None, Box::new(DetachedDataPlane))
    }

    pub fn new_with_protect(
        features: Features,
        events: Arc<dyn TelioEventCb>,
        protect: Arc<dyn TelioProtectCb>,
    ) -> TelioResult<Self> {
        Self::build(features, events, Some(protect), Box::new(DetachedDataPlane))
    }

    /// Device driving packets through `data_plane`.
    pub fn with_data_plane(
        features: Features,
        events: Arc<dyn TelioEventCb>,
        protect: Option<Arc<dyn TelioProtectCb>>,
        data_plane: Box<dyn DataPlane>,
    ) -> TelioResult<Self> {
        Self::build(features, events, protect, data_plane)
    }

    fn build(
        features: Features,
        events: Arc<dyn TelioEventCb>,
        protect: Option<Arc<dyn TelioProtectCb>>,
        data_plane: Box<dyn DataPlane>,
    ) -> TelioResult<Self> {
        let dispatcher = Dispatcher::spawn(events)?;
        debug!(?features, "device created");
        Ok(Self {
            features,
            state: Mutex::new(DeviceState::new()),
            dispatcher: Mutex::new(Some(dispatcher)),
            protect,
            data_plane,
        })
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Run `op` under the device lock, then deliver the events it queued.
    fn run<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut DeviceState, &mut Vec<Event>) -> TelioResult<T>,
    ) -> TelioResult<T> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let result = f(&mut state, &mut events);
            if let Err(e) = &result {
                state.last_error = e.to_string();
            }
            result
        };
        if let Err(e) = &result {
            debug!(op, error = %e, "device call failed");
        }
        for event in events {
            self.emit(event);
        }
        result
    }

    fn run_started<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut DeviceState, &mut Vec<Event>) -> TelioResult<T>,
    ) -> TelioResult<T> {
        self.run(op, |state, events| {
            if !state.running {
                return Err(TelioError::NotStarted);
            }
            f(state, events)
        })
    }

    fn sender(&self) -> Option<Sender<Dispatch>> {
        self.dispatcher.lock().as_ref().map(|d| d.tx.clone())
    }

    fn emit(&self, event: Event) {
        match self.sender() {
            Some(tx) => {
                if tx.send(Dispatch::Event(event)).is_err() {
                    warn!("event thread gone, event dropped");
                }
            }
            None => debug!("device shut down, event dropped"),
        }
    }

    /// Wait until every queued event has been handed to the host.
    fn flush_events(&self, timeout: Duration) {
        let Some(tx) = self.sender() else {
            return;
        };
        let (done_tx, done_rx) = bounded(1);
        if tx.send(Dispatch::Flush(done_tx)).is_err() {
            return;
        }
        if done_rx.recv_timeout(timeout).is_err() {
            warn!(?timeout, "timed out flushing events");
        }
    }

    fn shown_ip(&self, ip: &IpAddr) -> String {
        if self.features.hide_ips {
            "<hidden>".to_string()
        } else {
            ip.to_string()
        }
    }

    fn meshnet_node(&self, peer: &Peer) -> TelioNode {
        let base = &peer.base;
        let mut node = TelioNode::new(base.identifier.clone(), base.public_key);
        node.state = NodeState::Connecting;
        node.ip_addresses = base
            .ip_addresses
            .iter()
            .flatten()
            .filter(|ip| self.features.ipv6 || ip.is_ipv4())
            .copied()
            .collect();
        node.allowed_ips = node.ip_addresses.iter().map(host_prefix).collect();
        node.hostname = Some(base.hostname.clone());
        if self.features.nicknames {
            node.nickname = base.nickname.clone();
        }
        node.allow_incoming_connections = peer.allow_incoming_connections;
        node.allow_peer_send_files = peer.allow_peer_send_files;
        node.allow_multicast = self.features.multicast && peer.allow_multicast;
        node.peer_allows_multicast = self.features.multicast && peer.peer_allows_multicast;
        node
    }

    fn default_exit_ips(&self) -> Vec<IpNet> {
        let mut ips = vec!["0.0.0.0/0".to_string()];
        if self.features.ipv6 {
            ips.push("::/0".to_string());
        }
        ips
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start(&self, secret_key: SecretKey, adapter: TelioAdapterType) -> TelioResult<()> {
        self.start_tunnel(secret_key, adapter, TunnelSpec::Default)
    }

    pub fn start_named(
        &self,
        secret_key: SecretKey,
        adapter: TelioAdapterType,
        name: String,
    ) -> TelioResult<()> {
        if name.is_empty() {
            return self.run("start_named", |_, _| Err(TelioError::InvalidString));
        }
        self.start_tunnel(secret_key, adapter, TunnelSpec::Named(name))
    }

    pub fn start_with_tun(
        &self,
        secret_key: SecretKey,
        adapter: TelioAdapterType,
        tun: i32,
    ) -> TelioResult<()> {
        if tun < 0 {
            return self.run("start_with_tun", |_, _| Err(TelioError::BadConfig));
        }
        self.start_tunnel(secret_key, adapter, TunnelSpec::Fd(tun))
    }

    fn start_tunnel(
        &self,
        secret_key: SecretKey,
        adapter: TelioAdapterType,
        tunnel: TunnelSpec,
    ) -> TelioResult<()> {
        self.run("start", |state, _| {
            if state.shut_down {
                return Err(TelioError::unknown("device has been shut down"));
            }
            if state.running || state.starting {
                return Err(TelioError::AlreadyStarted);
            }
            if !adapter.is_supported() {
                return Err(TelioError::BadConfig);
            }
            state.starting = true;
            Ok(())
        })?;
        let _starting = Starting(&self.state);

        let started = self
            .data_plane
            .start(adapter, &tunnel, self.protect.as_deref());

        self.run("start", |state, _| {
            started?;
            info!(?adapter, ?tunnel, "device started");
            state.secret_key = secret_key;
            state.adapter = Some(adapter);
            state.running = true;
            state.asleep = false;
            Ok(())
        })
    }

    pub fn stop(&self) -> TelioResult<()> {
        self.stop_inner(true)
    }

    fn stop_inner(&self, flush: bool) -> TelioResult<()> {
        let was_running = self.run("stop", |state, events| {
            if !state.running {
                return Ok(false);
            }
            events.extend(state.nodes().into_iter().map(disconnected));
            if let Some(mut relay) = state.relay.take() {
                relay.conn_state = RelayState::Disconnected;
                events.push(Event::Relay(relay));
            }
            state.peers.clear();
            state.vpn = None;
            state.meshnet = None;
            state.magic_dns = None;
            state.adapter = None;
            state.running = false;
            Ok(true)
        })?;

        if was_running {
            self.data_plane.stop();
            info!("device stopped");
        }

        if flush && was_running {
            if let Some(secs) = self.features.flush_events_on_stop_timeout_seconds {
                self.flush_events(Duration::from_secs(secs));
            }
        }
        Ok(())
    }

    /// Stop and release the event thread. The device cannot be restarted.
    pub fn shutdown(&self) -> TelioResult<()> {
        self.stop_inner(true)?;
        self.state.lock().shut_down = true;
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.close(true);
        }
        Ok(())
    }

    /// Like [`Telio::shutdown`], without waiting for queued events.
    pub fn shutdown_hard(&self) -> TelioResult<()> {
        self.stop_inner(false)?;
        self.state.lock().shut_down = true;
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.close(false);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Adapter of the running device.
    pub fn adapter(&self) -> Option<TelioAdapterType> {
        self.state.lock().adapter
    }

    // ------------------------------------------------------------------
    // Keys and tunables
    // ------------------------------------------------------------------

    pub fn set_secret_key(&self, secret_key: SecretKey) -> TelioResult<()> {
        self.run("set_secret_key", |state, _| {
            state.secret_key = secret_key;
            Ok(())
        })
    }

    pub fn get_secret_key(&self) -> SecretKey {
        self.state.lock().secret_key
    }

    pub fn set_fwmark(&self, fwmark: u32) -> TelioResult<()> {
        self.run_started("set_fwmark", |state, _| {
            state.fwmark = Some(fwmark);
            Ok(())
        })
    }

    pub fn fwmark(&self) -> Option<u32> {
        self.state.lock().fwmark
    }

    pub fn get_adapter_luid(&self) -> u64 {
        self.data_plane.adapter_luid()
    }

    pub fn get_last_error(&self) -> String {
        self.state.lock().last_error.clone()
    }

    // ------------------------------------------------------------------
    // Meshnet
    // ------------------------------------------------------------------

    pub fn set_meshnet(&self, cfg: Config) -> TelioResult<()> {
        self.run_started("set_meshnet", |state, events| {
            if self.features.validate_keys && cfg.this.public_key != state.secret_key.public() {
                return Err(TelioError::BadConfig);
            }

            let mut next = BTreeMap::new();
            for peer in cfg.peers.iter().flatten() {
                let mut node = self.meshnet_node(peer);
                if let Some(old) = state.peers.get(&node.public_key) {
                    node.state = old.state;
                    node.path = old.path;
                    node.link_state = old.link_state;
                    if old.is_exit {
                        node.is_exit = true;
                        node.allowed_ips = old.allowed_ips.clone();
                    }
                    if *old == node {
                        next.insert(node.public_key, node);
                        continue;
                    }
                }
                events.push(Event::Node(node.clone()));
                next.insert(node.public_key, node);
            }

            for (key, old) in std::mem::take(&mut state.peers) {
                if !next.contains_key(&key) {
                    events.push(disconnected(old));
                }
            }
            state.peers = next;

            let relay = cfg
                .derp_servers
                .iter()
                .flatten()
                .min_by_key(|server| server.weight)
                .cloned();
            let relay_changed = match (&state.relay, &relay) {
                (Some(old), Some(new)) => old.public_key != new.public_key,
                (None, None) => false,
                _ => true,
            };
            if relay_changed {
                if let Some(mut old) = state.relay.take() {
                    old.conn_state = RelayState::Disconnected;
                    events.push(Event::Relay(old));
                }
                if let Some(mut new) = relay {
                    new.conn_state = RelayState::Connecting;
                    events.push(Event::Relay(new.clone()));
                    state.relay = Some(new);
                }
            }

            debug!(peers = state.peers.len(), "meshnet configured");
            state.meshnet = Some(cfg);
            Ok(())
        })
    }

    pub fn set_meshnet_off(&self) -> TelioResult<()> {
        self.run_started("set_meshnet_off", |state, events| {
            events.extend(std::mem::take(&mut state.peers).into_values().map(disconnected));
            if let Some(mut relay) = state.relay.take() {
                relay.conn_state = RelayState::Disconnected;
                events.push(Event::Relay(relay));
            }
            state.meshnet = None;
            Ok(())
        })
    }

    pub fn meshnet_config(&self) -> Option<Config> {
        self.state.lock().meshnet.clone()
    }

    pub fn get_status_map(&self) -> Vec<TelioNode> {
        self.state.lock().nodes()
    }

    // ------------------------------------------------------------------
    // Exit nodes
    // ------------------------------------------------------------------

    pub fn connect_to_exit_node(
        &self,
        public_key: PublicKey,
        allowed_ips: Option<Vec<IpNet>>,
        endpoint: Option<std::net::SocketAddr>,
    ) -> TelioResult<()> {
        self.connect_exit("connect_to_exit_node", None, public_key, allowed_ips, endpoint, false)
    }

    pub fn connect_to_exit_node_with_id(
        &self,
        identifier: Option<String>,
        public_key: PublicKey,
        allowed_ips: Option<Vec<IpNet>>,
        endpoint: Option<std::net::SocketAddr>,
    ) -> TelioResult<()> {
        self.connect_exit(
            "connect_to_exit_node_with_id",
            identifier,
            public_key,
            allowed_ips,
            endpoint,
            false,
        )
    }

    /// Post-quantum tunnels are only offered by VPN servers, so `endpoint`
    /// is required.
    pub fn connect_to_exit_node_postquantum(
        &self,
        identifier: Option<String>,
        public_key: PublicKey,
        allowed_ips: Option<Vec<IpNet>>,
        endpoint: Option<std::net::SocketAddr>,
    ) -> TelioResult<()> {
        self.connect_exit(
            "connect_to_exit_node_postquantum",
            identifier,
            public_key,
            allowed_ips,
            endpoint,
            true,
        )
    }

    fn connect_exit(
        &self,
        op: &'static str,
        identifier: Option<String>,
        public_key: PublicKey,
        allowed_ips: Option<Vec<IpNet>>,
        endpoint: Option<std::net::SocketAddr>,
        postquantum: bool,
    ) -> TelioResult<()> {
        self.run_started(op, |state, events| {
            if let Some(ips) = &allowed_ips {
                if !ips.iter().all(|net| is_valid_ip_net(net)) {
                    return Err(TelioError::BadConfig);
                }
            }
            if postquantum && endpoint.is_none() {
                return Err(TelioError::BadConfig);
            }
            let allowed = allowed_ips.unwrap_or_else(|| self.default_exit_ips());

            release_exit(state, events, |key| key != public_key);

            if let Some(peer) = state.peers.get_mut(&public_key) {
                peer.is_exit = true;
                for net in allowed {
                    if !peer.allowed_ips.contains(&net) {
                        peer.allowed_ips.push(net);
                    }
                }
                events.push(Event::Node(peer.clone()));
                return Ok(());
            }

            let mut node = TelioNode::new(
                identifier.unwrap_or_else(|| public_key.to_string()),
                public_key,
            );
            node.state = NodeState::Connecting;
            node.is_exit = true;
            node.is_vpn = endpoint.is_some();
            node.allowed_ips = allowed;
            node.endpoint = endpoint;
            if endpoint.is_some() {
                node.path = PathType::Direct;
            }
            info!(vpn = node.is_vpn, postquantum, "connecting to exit node");
            events.push(Event::Node(node.clone()));
            state.vpn = Some(node);
            Ok(())
        })
    }

    pub fn disconnect_from_exit_node(&self, public_key: PublicKey) -> TelioResult<()> {
        self.run_started("disconnect_from_exit_node", |state, events| {
            release_exit(state, events, |key| key == public_key);
            Ok(())
        })
    }

    pub fn disconnect_from_exit_nodes(&self) -> TelioResult<()> {
        self.run_started("disconnect_from_exit_nodes", |state, events| {
            release_exit(state, events, |_| true);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // DNS
    // ------------------------------------------------------------------

    pub fn enable_magic_dns(&self, forward_servers: Vec<IpAddr>) -> TelioResult<()> {
        self.run_started("enable_magic_dns", |state, _| {
            debug!(servers = forward_servers.len(), "magic DNS enabled");
            state.magic_dns = Some(forward_servers);
            Ok(())
        })
    }

    pub fn disable_magic_dns(&self) -> TelioResult<()> {
        self.run_started("disable_magic_dns", |state, _| {
            state.magic_dns = None;
            Ok(())
        })
    }

    pub fn magic_dns(&self) -> Option<Vec<IpAddr>> {
        self.state.lock().magic_dns.clone()
    }

    // ------------------------------------------------------------------
    // Network and power notifications
    // ------------------------------------------------------------------

    /// Established connections are renegotiated over the relay.
    pub fn notify_network_change(&self, network_info: String) -> TelioResult<()> {
        self.run_started("notify_network_change", |state, events| {
            debug!(network_info_len = network_info.len(), "network changed");
            if state.asleep {
                return Ok(());
            }
            reconnect(state, events);
            Ok(())
        })
    }

    pub fn notify_sleep(&self) -> TelioResult<()> {
        self.run_started("notify_sleep", |state, _| {
            state.asleep = true;
            Ok(())
        })
    }

    pub fn notify_wakeup(&self) -> TelioResult<()> {
        self.run_started("notify_wakeup", |state, events| {
            if std::mem::replace(&mut state.asleep, false) {
                reconnect(state, events);
            }
            Ok(())
        })
    }

    pub fn is_asleep(&self) -> bool {
        self.state.lock().asleep
    }

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------

    pub fn trigger_analytics_event(&self) -> TelioResult<()> {
        self.run_started("trigger_analytics_event", |_, _| {
            if self.features.nurse.is_none() {
                return Err(TelioError::BadConfig);
            }
            debug!("analytics event triggered");
            Ok(())
        })
    }

    pub fn trigger_qos_collection(&self) -> TelioResult<()> {
        self.run_started("trigger_qos_collection", |_, _| {
            match self.features.nurse.as_ref().and_then(|n| n.qos.as_ref()) {
                Some(qos) => {
                    debug!(tries = qos.rtt_tries, "QoS collection triggered");
                    Ok(())
                }
                None => Err(TelioError::BadConfig),
            }
        })
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn get_nat(&self, ip: &str, port: u16) -> TelioResult<NatType> {
        let ip: IpAddr = self.run("get_nat", |_, _| {
            ip.parse().map_err(|_| TelioError::InvalidString)
        })?;
        debug!(ip = %self.shown_ip(&ip), port, "detecting NAT type");
        let nat = self.data_plane.nat_type(ip, port);
        self.run("get_nat", |_, _| nat)
    }

    pub fn probe_pmtu(&self, host: IpAddr) -> TelioResult<u32> {
        let timeout = self.run_started("probe_pmtu", |_, _| {
            let pmtu = self
                .features
                .pmtu_discovery
                .as_ref()
                .ok_or(TelioError::BadConfig)?;
            Ok(Duration::from_secs(u64::from(pmtu.response_wait_timeout_s)))
        })?;
        debug!(host = %self.shown_ip(&host), "probing PMTU");
        let pmtu = self.data_plane.probe_pmtu(host, timeout);
        self.run("probe_pmtu", |_, _| pmtu)
    }

    /// Round trip through the event thread.
    pub fn receive_ping(&self) -> TelioResult<String> {
        self.run_started("receive_ping", |_, _| Ok(()))?;
        let tx = self
            .sender()
            .ok_or_else(|| TelioError::unknown("event thread is gone"))?;
        let (reply_tx, reply_rx) = bounded(1);
        let pong = tx
            .send(Dispatch::Ping(reply_tx))
            .map_err(|_| TelioError::unknown("event thread is gone"))
            .and_then(|()| {
                reply_rx
                    .recv_timeout(PING_TIMEOUT)
                    .map_err(|e| TelioError::unknown(format!("no reply from event thread: {e}")))
            });
        self.run("receive_ping", |_, _| pong)
    }

    pub fn generate_stack_panic(&self) -> TelioResult<()> {
        panic!("runtime_panic_test_call_stack");
    }

    pub fn generate_thread_panic(&self) -> TelioResult<()> {
        let handle = thread::Builder::new()
            .name("telio-panic-test".into())
            .spawn(|| panic!("runtime_panic_test"))
            .map_err(|e| TelioError::unknown(e.to_string()))?;
        if handle.join().is_err() {
            warn!("panic test thread panicked");
        }
        Ok(())
    }
}

impl Drop for Telio {
    fn drop(&mut self) {
        let running = self.state.get_mut().running;
        if running {
            self.data_plane.stop();
        }
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.close(true);
        }
    }
}

/// Clears the starting mark however the start ends.
struct Starting<'a>(&'a Mutex<DeviceState>);

impl Drop for Starting<'_> {
    fn drop(&mut self) {
        self.0.lock().starting = false;
    }
}

/// Drop the exit role from every exit node whose key matches.
fn release_exit(
    state: &mut DeviceState,
    events: &mut Vec<Event>,
    matches: impl Fn(PublicKey) -> bool,
) {
    if state.vpn.as_ref().is_some_and(|node| matches(node.public_key)) {
        if let Some(node) = state.vpn.take() {
            events.push(disconnected(node));
        }
    }
    for peer in state.peers.values_mut() {
        if peer.is_exit && matches(peer.public_key) {
            peer.is_exit = false;
            peer.allowed_ips = peer.ip_addresses.iter().map(host_prefix).collect();
            events.push(Event::Node(peer.clone()));
        }
    }
}

fn reconnect(state: &mut DeviceState, events: &mut Vec<Event>) {
    for node in state.peers.values_mut().chain(state.vpn.iter_mut()) {
        if node.state == NodeState::Connected {
            node.state = NodeState::Connecting;
            node.path = PathType::Relay;
            events.push(Event::Node(node.clone()));
        }
    }
}
