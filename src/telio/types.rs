//! Device API data types
//!
//! Enums cross the boundary as their 1-based variant index. Records cross as
//! JSON text, so every record here derives serde and tolerates missing
//! fields where the device has a sensible default.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::keys::PublicKey;

/// Network prefix in `address/length` form.
pub type IpNet = String;

/// String that is elided from logs when `hide_ips` is on.
pub type HiddenString = String;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelioAdapterType {
    BoringTun,
    LinuxNativeTun,
    WireguardGoTun,
    WindowsNativeTun,
}

crate::wire_enum!(TelioAdapterType {
    BoringTun = 1,
    LinuxNativeTun = 2,
    WireguardGoTun = 3,
    WindowsNativeTun = 4,
});

impl TelioAdapterType {
    /// Whether this build can drive the adapter.
    pub fn is_supported(self) -> bool {
        match self {
            Self::BoringTun | Self::WireguardGoTun => true,
            Self::LinuxNativeTun => cfg!(target_os = "linux"),
            Self::WindowsNativeTun => cfg!(target_os = "windows"),
        }
    }
}

/// Log levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelioLogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

crate::wire_enum!(TelioLogLevel {
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
});

impl From<tracing::Level> for TelioLogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    UdpBlocked,
    OpenInternet,
    SymmetricUdpFirewall,
    FullCone,
    RestrictedCone,
    PortRestrictedCone,
    Symmetric,
    Unknown,
}

crate::wire_enum!(NatType {
    UdpBlocked = 1,
    OpenInternet = 2,
    SymmetricUdpFirewall = 3,
    FullCone = 4,
    RestrictedCone = 5,
    PortRestrictedCone = 6,
    Symmetric = 7,
    Unknown = 8,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

crate::wire_enum!(NodeState {
    Disconnected = 1,
    Connecting = 2,
    Connected = 3,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Down,
    Up,
}

crate::wire_enum!(LinkState { Down = 1, Up = 2 });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

crate::wire_enum!(RelayState {
    Disconnected = 1,
    Connecting = 2,
    Connected = 3,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLevel {
    Critical,
    Severe,
    Warning,
    Notice,
}

crate::wire_enum!(ErrorLevel {
    Critical = 1,
    Severe = 2,
    Warning = 3,
    Notice = 4,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoError,
    Unknown,
}

crate::wire_enum!(ErrorCode { NoError = 1, Unknown = 2 });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    #[default]
    Relay,
    Direct,
}

crate::wire_enum!(PathType { Relay = 1, Direct = 2 });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointProvider {
    Local,
    Stun,
    Upnp,
}

crate::wire_enum!(EndpointProvider {
    Local = 1,
    Stun = 2,
    Upnp = 3,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RttType {
    Ping,
}

crate::wire_enum!(RttType { Ping = 1 });

// ============================================================================
// Feature configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturePersistentKeepalive {
    pub vpn: Option<u32>,
    pub direct: u32,
    pub proxying: Option<u32>,
    pub stun: Option<u32>,
}

impl Default for FeaturePersistentKeepalive {
    fn default() -> Self {
        Self {
            vpn: Some(25),
            direct: 5,
            proxying: Some(25),
            stun: Some(25),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWireguard {
    pub persistent_keepalive: FeaturePersistentKeepalive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureQoS {
    pub rtt_interval: u64,
    pub rtt_tries: u32,
    pub rtt_types: Vec<RttType>,
    pub buckets: u32,
}

impl Default for FeatureQoS {
    fn default() -> Self {
        Self {
            rtt_interval: 300,
            rtt_tries: 3,
            rtt_types: vec![RttType::Ping],
            buckets: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureNurse {
    pub heartbeat_interval: u64,
    pub initial_heartbeat_interval: u64,
    pub qos: Option<FeatureQoS>,
    pub enable_nat_type_collection: bool,
    pub enable_relay_conn_data: bool,
    pub enable_nat_traversal_conn_data: bool,
    pub state_duration_cap: u64,
}

impl Default for FeatureNurse {
    fn default() -> Self {
        Self {
            heartbeat_interval: 3600,
            initial_heartbeat_interval: 300,
            qos: None,
            enable_nat_type_collection: false,
            enable_relay_conn_data: true,
            enable_nat_traversal_conn_data: true,
            state_duration_cap: 86400,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureLana {
    pub event_path: String,
    #[serde(default)]
    pub prod: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturePaths {
    pub priority: Vec<PathType>,
    pub force: Option<PathType>,
}

impl Default for FeaturePaths {
    fn default() -> Self {
        Self {
            priority: vec![PathType::Direct],
            force: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSkipUnresponsivePeers {
    pub no_rx_threshold_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureEndpointProvidersOptimization {
    pub optimize_direct_upgrade_stun: bool,
    pub optimize_direct_upgrade_upnp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDirect {
    pub providers: Option<Vec<EndpointProvider>>,
    pub endpoint_interval_secs: u64,
    pub skip_unresponsive_peers: Option<FeatureSkipUnresponsivePeers>,
    pub endpoint_providers_optimization: Option<FeatureEndpointProvidersOptimization>,
}

impl Default for FeatureDirect {
    fn default() -> Self {
        Self {
            providers: None,
            endpoint_interval_secs: 10,
            skip_unresponsive_peers: Some(FeatureSkipUnresponsivePeers {
                no_rx_threshold_secs: 180,
            }),
            endpoint_providers_optimization: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDerp {
    pub tcp_keepalive: Option<u32>,
    pub derp_keepalive: Option<u32>,
    pub enable_polling: Option<bool>,
    pub use_built_in_root_certificates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFirewall {
    pub boringtun_reset_conns: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureLinkDetection {
    pub rtt_seconds: u64,
    pub no_of_pings: u32,
    pub use_for_downgrade: bool,
}

impl Default for FeatureLinkDetection {
    fn default() -> Self {
        Self {
            rtt_seconds: 15,
            no_of_pings: 0,
            use_for_downgrade: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureExitDns {
    pub auto_switch_dns_ips: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDns {
    pub ttl_value: u32,
    pub exit_dns: Option<FeatureExitDns>,
}

impl Default for FeatureDns {
    fn default() -> Self {
        Self {
            ttl_value: 60,
            exit_dns: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturePostQuantumVpn {
    pub handshake_retry_interval_s: u32,
    pub rekey_interval_s: u32,
}

impl Default for FeaturePostQuantumVpn {
    fn default() -> Self {
        Self {
            handshake_retry_interval_s: 8,
            rekey_interval_s: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturePmtuDiscovery {
    pub response_wait_timeout_s: u32,
}

impl Default for FeaturePmtuDiscovery {
    fn default() -> Self {
        Self {
            response_wait_timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureBatching {
    pub direct_connection_threshold: u32,
}

impl Default for FeatureBatching {
    fn default() -> Self {
        Self {
            direct_connection_threshold: 15,
        }
    }
}

/// Optional behaviour toggles for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub wireguard: FeatureWireguard,
    pub nurse: Option<FeatureNurse>,
    pub lana: Option<FeatureLana>,
    pub paths: Option<FeaturePaths>,
    pub direct: Option<FeatureDirect>,
    pub is_test_env: Option<bool>,
    pub hide_ips: bool,
    pub derp: Option<FeatureDerp>,
    pub validate_keys: bool,
    pub ipv6: bool,
    pub nicknames: bool,
    pub firewall: FeatureFirewall,
    pub flush_events_on_stop_timeout_seconds: Option<u64>,
    pub link_detection: Option<FeatureLinkDetection>,
    pub dns: FeatureDns,
    pub post_quantum_vpn: FeaturePostQuantumVpn,
    pub pmtu_discovery: Option<FeaturePmtuDiscovery>,
    pub multicast: bool,
    pub batching: Option<FeatureBatching>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            wireguard: FeatureWireguard::default(),
            nurse: None,
            lana: None,
            paths: None,
            direct: None,
            is_test_env: None,
            hide_ips: true,
            derp: None,
            validate_keys: true,
            ipv6: false,
            nicknames: false,
            firewall: FeatureFirewall::default(),
            flush_events_on_stop_timeout_seconds: None,
            link_detection: None,
            dns: FeatureDns::default(),
            post_quantum_vpn: FeaturePostQuantumVpn::default(),
            pmtu_discovery: Some(FeaturePmtuDiscovery::default()),
            multicast: false,
            batching: None,
        }
    }
}

// ============================================================================
// Meshnet configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerBase {
    pub identifier: String,
    pub public_key: PublicKey,
    pub hostname: HiddenString,
    #[serde(default)]
    pub ip_addresses: Option<Vec<IpAddr>>,
    #[serde(default)]
    pub nickname: Option<HiddenString>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub base: PeerBase,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub allow_incoming_connections: bool,
    #[serde(default)]
    pub allow_peer_send_files: bool,
    #[serde(default)]
    pub allow_multicast: bool,
    #[serde(default)]
    pub peer_allows_multicast: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub region_code: String,
    #[serde(default)]
    pub name: String,
    pub hostname: String,
    pub ipv4: Ipv4Addr,
    pub relay_port: u16,
    #[serde(default)]
    pub stun_port: u16,
    #[serde(default)]
    pub stun_plaintext_port: u16,
    pub public_key: PublicKey,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub use_plain_text: bool,
    #[serde(default)]
    pub conn_state: RelayState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub dns_servers: Option<Vec<IpAddr>>,
}

/// Meshnet map pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub this: PeerBase,
    #[serde(default)]
    pub peers: Option<Vec<Peer>>,
    #[serde(default)]
    pub derp_servers: Option<Vec<Server>>,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
}

// ============================================================================
// Events
// ============================================================================

/// A peer as reported in the status map and node events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelioNode {
    pub identifier: String,
    pub public_key: PublicKey,
    #[serde(default)]
    pub nickname: Option<String>,
    pub state: NodeState,
    #[serde(default)]
    pub link_state: Option<LinkState>,
    pub is_exit: bool,
    pub is_vpn: bool,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    #[serde(default)]
    pub endpoint: Option<SocketAddr>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub allow_incoming_connections: bool,
    #[serde(default)]
    pub allow_peer_send_files: bool,
    #[serde(default)]
    pub path: PathType,
    #[serde(default)]
    pub allow_multicast: bool,
    #[serde(default)]
    pub peer_allows_multicast: bool,
}

impl TelioNode {
    pub fn new(identifier: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            identifier: identifier.into(),
            public_key,
            nickname: None,
            state: NodeState::Disconnected,
            link_state: None,
            is_exit: false,
            is_vpn: false,
            ip_addresses: Vec::new(),
            allowed_ips: Vec::new(),
            endpoint: None,
            hostname: None,
            allow_incoming_connections: false,
            allow_peer_send_files: false,
            path: PathType::Relay,
            allow_multicast: false,
            peer_allows_multicast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub level: ErrorLevel,
    pub code: ErrorCode,
    pub msg: String,
}

/// Everything a device reports through its event callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Event {
    Relay(Server),
    Node(TelioNode),
    Error(ErrorEvent),
}

/// Check that `net` is an `address/length` prefix.
pub fn is_valid_ip_net(net: &str) -> bool {
    let Some((addr, len)) = net.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    len.parse::<u8>().map(|len| len <= max).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::codec::{lift_from_bytes, lower_to_vec, CodecError};
    use crate::telio::keys::SecretKey;

    #[test]
    fn test_enum_indices() {
        assert_eq!(lower_to_vec(&TelioAdapterType::BoringTun), vec![0, 0, 0, 1]);
        assert_eq!(lower_to_vec(&TelioLogLevel::Trace), vec![0, 0, 0, 5]);
        assert_eq!(lower_to_vec(&NatType::Unknown), vec![0, 0, 0, 8]);
        assert_eq!(
            lift_from_bytes::<NatType>(&[0, 0, 0, 4]).unwrap(),
            NatType::FullCone
        );
    }

    #[test]
    fn test_enum_index_zero_rejected() {
        let err = lift_from_bytes::<TelioAdapterType>(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidVariant { value: 0, .. }));
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(TelioLogLevel::Error < TelioLogLevel::Warning);
        assert!(TelioLogLevel::Debug < TelioLogLevel::Trace);
        assert_eq!(TelioLogLevel::from(tracing::Level::WARN), TelioLogLevel::Warning);
    }

    #[test]
    fn test_empty_features_use_defaults() {
        let features: Features = serde_json::from_str("{}").unwrap();
        assert_eq!(features, Features::default());
        assert!(features.pmtu_discovery.is_some());
        assert!(features.nurse.is_none());
    }

    #[test]
    fn test_partial_features() {
        let features: Features =
            serde_json::from_str(r#"{"nurse": {"qos": {}}, "hide_ips": false}"#).unwrap();
        let nurse = features.nurse.unwrap();
        assert_eq!(nurse.heartbeat_interval, 3600);
        assert_eq!(nurse.qos.unwrap().rtt_types, vec![RttType::Ping]);
        assert!(!features.hide_ips);
    }

    #[test]
    fn test_meshnet_config_parses() {
        let key = SecretKey::generate().public();
        let json = format!(
            r#"{{
                "this": {{"identifier": "me", "public_key": "{key}", "hostname": "me.nord"}},
                "peers": [{{"base": {{"identifier": "p1", "public_key": "{key}",
                            "hostname": "p1.nord", "ip_addresses": ["100.64.0.2"]}}}}]
            }}"#
        );
        let cfg: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.this.public_key, key);
        let peers = cfg.peers.unwrap();
        assert_eq!(peers[0].base.ip_addresses.as_ref().unwrap().len(), 1);
        assert!(!peers[0].allow_incoming_connections);
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::Error(ErrorEvent {
            level: ErrorLevel::Severe,
            code: ErrorCode::Unknown,
            msg: "relay lost".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["body"]["level"], "severe");
        assert_eq!(serde_json::from_value::<Event>(value).unwrap(), event);
    }

    #[test]
    fn test_ip_net_validation() {
        assert!(is_valid_ip_net("0.0.0.0/0"));
        assert!(is_valid_ip_net("fd74:656c:696f::/64"));
        assert!(!is_valid_ip_net("10.0.0.0/33"));
        assert!(!is_valid_ip_net("10.0.0.0"));
        assert!(!is_valid_ip_net("nope/8"));
    }
}
