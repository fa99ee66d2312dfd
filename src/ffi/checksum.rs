//! Contract version and interface checksums
//!
//! The host bindings were generated against a particular set of exported
//! signatures. Before making any other call they compare the contract
//! version and one checksum per function with the values compiled into the
//! bindings, and refuse to continue on the first mismatch.
//!
//! A checksum is the SHA-256 digest of the symbol's canonical signature
//! folded down to 16 bits, so renaming a parameter, changing a type or
//! adding an error moves it.

use std::collections::HashMap;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Version of the scaffolding ABI.
pub const CONTRACT_VERSION: u32 = 24;

/// Namespace every symbol is exported under.
pub const NAMESPACE: &str = "telio";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    #[error("no checksum for symbol '{0}'")]
    UnknownSymbol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Constructor,
    Method,
}

/// Signature of one exported function or method.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceSymbol {
    pub kind: SymbolKind,
    /// Object or callback interface the symbol belongs to.
    pub owner: &'static str,
    pub name: &'static str,
    pub params: &'static [(&'static str, &'static str)],
    pub returns: Option<&'static str>,
    pub throws: Option<&'static str>,
}

const OBJECT: &str = "telio";
const THROWS: Option<&str> = Some("TelioError");

const fn func(
    name: &'static str,
    params: &'static [(&'static str, &'static str)],
    returns: Option<&'static str>,
    throws: Option<&'static str>,
) -> InterfaceSymbol {
    InterfaceSymbol {
        kind: SymbolKind::Function,
        owner: NAMESPACE,
        name,
        params,
        returns,
        throws,
    }
}

const fn constructor(
    name: &'static str,
    params: &'static [(&'static str, &'static str)],
) -> InterfaceSymbol {
    InterfaceSymbol {
        kind: SymbolKind::Constructor,
        owner: OBJECT,
        name,
        params,
        returns: Some("Telio"),
        throws: THROWS,
    }
}

const fn method(
    name: &'static str,
    params: &'static [(&'static str, &'static str)],
    returns: Option<&'static str>,
    throws: Option<&'static str>,
) -> InterfaceSymbol {
    InterfaceSymbol {
        kind: SymbolKind::Method,
        owner: OBJECT,
        name,
        params,
        returns,
        throws,
    }
}

const fn callback_method(
    owner: &'static str,
    name: &'static str,
    params: &'static [(&'static str, &'static str)],
    throws: Option<&'static str>,
) -> InterfaceSymbol {
    InterfaceSymbol {
        kind: SymbolKind::Method,
        owner,
        name,
        params,
        returns: None,
        throws,
    }
}

const EXIT_NODE: &[(&str, &str)] = &[
    ("public_key", "PublicKey"),
    ("allowed_ips", "Option<Vec<IpNet>>"),
    ("endpoint", "Option<SocketAddr>"),
];

const EXIT_NODE_WITH_ID: &[(&str, &str)] = &[
    ("identifier", "Option<String>"),
    ("public_key", "PublicKey"),
    ("allowed_ips", "Option<Vec<IpNet>>"),
    ("endpoint", "Option<SocketAddr>"),
];

/// Every exported function, constructor and method.
pub static INTERFACE: &[InterfaceSymbol] = &[
    func("deserialize_feature_config", &[("fstr", "String")], Some("Features"), THROWS),
    func("deserialize_meshnet_config", &[("cfg_str", "String")], Some("Config"), THROWS),
    func("generate_public_key", &[("secret_key", "SecretKey")], Some("PublicKey"), None),
    func("generate_secret_key", &[], Some("SecretKey"), None),
    func("get_commit_sha", &[], Some("String"), None),
    func("get_default_adapter", &[], Some("TelioAdapterType"), None),
    func("get_default_feature_config", &[], Some("Features"), None),
    func("get_version_tag", &[], Some("String"), None),
    func(
        "set_global_logger",
        &[("log_level", "TelioLogLevel"), ("logger", "TelioLoggerCb")],
        None,
        None,
    ),
    constructor("new", &[("features", "Features"), ("events", "TelioEventCb")]),
    constructor(
        "new_with_protect",
        &[
            ("features", "Features"),
            ("events", "TelioEventCb"),
            ("protect", "TelioProtectCb"),
        ],
    ),
    method("connect_to_exit_node", EXIT_NODE, None, THROWS),
    method("connect_to_exit_node_postquantum", EXIT_NODE_WITH_ID, None, THROWS),
    method("connect_to_exit_node_with_id", EXIT_NODE_WITH_ID, None, THROWS),
    method("disable_magic_dns", &[], None, THROWS),
    method("disconnect_from_exit_node", &[("public_key", "PublicKey")], None, THROWS),
    method("disconnect_from_exit_nodes", &[], None, THROWS),
    method("enable_magic_dns", &[("forward_servers", "Vec<IpAddr>")], None, THROWS),
    method("generate_stack_panic", &[], None, THROWS),
    method("generate_thread_panic", &[], None, THROWS),
    method("get_adapter_luid", &[], Some("u64"), None),
    method("get_last_error", &[], Some("String"), None),
    method("get_nat", &[("ip", "String"), ("port", "u16")], Some("NatType"), THROWS),
    method("get_secret_key", &[], Some("SecretKey"), None),
    method("get_status_map", &[], Some("Vec<TelioNode>"), None),
    method("is_running", &[], Some("bool"), None),
    method("notify_network_change", &[("network_info", "String")], None, THROWS),
    method("notify_sleep", &[], None, THROWS),
    method("notify_wakeup", &[], None, THROWS),
    method("probe_pmtu", &[("host", "IpAddr")], Some("u32"), THROWS),
    method("receive_ping", &[], Some("String"), THROWS),
    method("set_fwmark", &[("fwmark", "u32")], None, THROWS),
    method("set_meshnet", &[("cfg", "Config")], None, THROWS),
    method("set_meshnet_off", &[], None, THROWS),
    method("set_secret_key", &[("secret_key", "SecretKey")], None, THROWS),
    method("shutdown", &[], None, THROWS),
    method("shutdown_hard", &[], None, THROWS),
    method(
        "start",
        &[("secret_key", "SecretKey"), ("adapter", "TelioAdapterType")],
        None,
        THROWS,
    ),
    method(
        "start_named",
        &[
            ("secret_key", "SecretKey"),
            ("adapter", "TelioAdapterType"),
            ("name", "String"),
        ],
        None,
        THROWS,
    ),
    method(
        "start_with_tun",
        &[
            ("secret_key", "SecretKey"),
            ("adapter", "TelioAdapterType"),
            ("tun", "i32"),
        ],
        None,
        THROWS,
    ),
    method("stop", &[], None, THROWS),
    method("trigger_analytics_event", &[], None, THROWS),
    method("trigger_qos_collection", &[], None, THROWS),
    callback_method("telioeventcb", "event", &[("payload", "Event")], THROWS),
    callback_method(
        "teliologgercb",
        "log",
        &[("log_level", "TelioLogLevel"), ("payload", "String")],
        THROWS,
    ),
    callback_method("telioprotectcb", "protect", &[("socket_id", "i32")], THROWS),
];

impl InterfaceSymbol {
    /// Name of the exported checksum accessor.
    pub fn accessor(&self) -> String {
        match self.kind {
            SymbolKind::Function => format!("uniffi_{NAMESPACE}_checksum_func_{}", self.name),
            SymbolKind::Constructor => format!(
                "uniffi_{NAMESPACE}_checksum_constructor_{}_{}",
                self.owner, self.name
            ),
            SymbolKind::Method => {
                format!("uniffi_{NAMESPACE}_checksum_method_{}_{}", self.owner, self.name)
            }
        }
    }

    /// Name of the exported function itself. Callback methods have none;
    /// they are reached through the registered trampoline.
    pub fn scaffolding(&self) -> String {
        match self.kind {
            SymbolKind::Function => format!("uniffi_{NAMESPACE}_fn_func_{}", self.name),
            SymbolKind::Constructor => format!(
                "uniffi_{NAMESPACE}_fn_constructor_{}_{}",
                self.owner, self.name
            ),
            SymbolKind::Method => {
                format!("uniffi_{NAMESPACE}_fn_method_{}_{}", self.owner, self.name)
            }
        }
    }

    /// Canonical signature text, e.g.
    /// `method telio.get_nat(ip: String, port: u16) -> NatType throws TelioError`.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        let kind = match self.kind {
            SymbolKind::Function => "func",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Method => "method",
        };
        let _ = write!(out, "{kind} {}.{}(", self.owner, self.name);
        for (i, (name, ty)) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{name}: {ty}");
        }
        out.push(')');
        if let Some(ret) = self.returns {
            let _ = write!(out, " -> {ret}");
        }
        if let Some(err) = self.throws {
            let _ = write!(out, " throws {err}");
        }
        out
    }

    pub fn checksum(&self) -> u16 {
        fold_digest(&Sha256::digest(self.canonical().as_bytes()))
    }
}

/// XOR a digest down to 16 bits, big-endian pairs.
pub fn fold_digest(digest: &[u8]) -> u16 {
    digest.chunks(2).fold(0u16, |acc, pair| {
        let hi = pair[0] as u16;
        let lo = pair.get(1).copied().unwrap_or(0) as u16;
        acc ^ ((hi << 8) | lo)
    })
}

static CHECKSUMS: Lazy<HashMap<String, u16>> = Lazy::new(|| {
    INTERFACE
        .iter()
        .map(|symbol| (symbol.accessor(), symbol.checksum()))
        .collect()
});

/// Checksum served by the accessor named `accessor`.
pub fn lookup(accessor: &str) -> Result<u16, ChecksumError> {
    CHECKSUMS
        .get(accessor)
        .copied()
        .ok_or_else(|| ChecksumError::UnknownSymbol(accessor.to_string()))
}

/// `(accessor, checksum)` for every symbol, in declaration order.
pub fn checksum_table() -> Vec<(String, u16)> {
    INTERFACE
        .iter()
        .map(|symbol| (symbol.accessor(), symbol.checksum()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_accessor_names() {
        let start = INTERFACE.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.accessor(), "uniffi_telio_checksum_method_telio_start");
        assert_eq!(start.scaffolding(), "uniffi_telio_fn_method_telio_start");

        let new = INTERFACE.iter().find(|s| s.kind == SymbolKind::Constructor).unwrap();
        assert_eq!(new.accessor(), "uniffi_telio_checksum_constructor_telio_new");
    }

    #[test]
    fn test_canonical_signature() {
        let get_nat = INTERFACE.iter().find(|s| s.name == "get_nat").unwrap();
        assert_eq!(
            get_nat.canonical(),
            "method telio.get_nat(ip: String, port: u16) -> NatType throws TelioError"
        );
    }

    #[test]
    fn test_signature_change_moves_checksum() {
        let original = func("get_version_tag", &[], Some("String"), None);
        let changed = func("get_version_tag", &[], Some("Option<String>"), None);
        assert_ne!(original.checksum(), changed.checksum());
        assert_eq!(original.checksum(), original.checksum());
    }

    #[test]
    fn test_accessors_are_unique() {
        let names: HashSet<_> = INTERFACE.iter().map(|s| s.accessor()).collect();
        assert_eq!(names.len(), INTERFACE.len());
    }

    #[test]
    fn test_callback_methods_are_covered() {
        let log = INTERFACE.iter().find(|s| s.owner == "teliologgercb").unwrap();
        assert_eq!(log.accessor(), "uniffi_telio_checksum_method_teliologgercb_log");
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(
            lookup("uniffi_telio_checksum_func_nope"),
            Err(ChecksumError::UnknownSymbol("uniffi_telio_checksum_func_nope".into()))
        );
    }

    #[test]
    fn test_fold_digest() {
        assert_eq!(fold_digest(&[0x12, 0x34, 0x00, 0x0f]), 0x123b);
        assert_eq!(fold_digest(&[0xff]), 0xff00);
    }
}
