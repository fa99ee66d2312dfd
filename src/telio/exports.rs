//! C exports of the device API
//!
//! Devices live in a handle table; the host holds the `u64` handle returned
//! by a constructor and passes it back to every method until
//! `uniffi_telio_fn_free_telio`.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config;
use crate::ffi::buffer::RustBuffer;
use crate::ffi::codec::{
    lift_from_buffer, lift_from_bytes, lift_string, lift_utf8, lower_into_buffer, lower_string,
    take_buffers, Json,
};
use crate::ffi::handle_map::{tags, HandleMap};
use crate::ffi::status::{rust_call, CallError, RustCallStatus};

use super::callbacks::{ForeignEventCb, ForeignLoggerCb, ForeignProtectCb};
use super::device::Telio;
use super::error::TelioError;
use super::keys::{PublicKey, SecretKey};
use super::types::{Config, Features, IpNet, TelioAdapterType, TelioLogLevel, TelioNode};

static DEVICES: Lazy<HandleMap<Arc<Telio>>> = Lazy::new(|| {
    HandleMap::with_capacity_limit(tags::TELIO, config::global().bridge.max_handles)
});

/// Number of devices the host has not freed yet.
pub fn live_devices() -> usize {
    DEVICES.len()
}

fn device(handle: u64) -> Result<Arc<Telio>, CallError> {
    Ok(DEVICES.get(handle)?)
}

/// A key argument; a malformed key is the caller's error.
fn lift_key<K: FromStr<Err = super::keys::KeyError>>(bytes: Vec<u8>) -> Result<K, CallError> {
    let text = lift_utf8(bytes)?;
    Ok(text.parse::<K>().map_err(TelioError::from)?)
}

fn lift_ip(text: &str) -> Result<IpAddr, CallError> {
    Ok(text.parse().map_err(|_| TelioError::InvalidString)?)
}

fn lift_endpoint(bytes: &[u8]) -> Result<Option<SocketAddr>, CallError> {
    let endpoint: Option<String> = lift_from_bytes(bytes)?;
    Ok(endpoint
        .map(|text| text.parse::<SocketAddr>())
        .transpose()
        .map_err(|_| TelioError::BadConfig)?)
}

// ============================================================================
// Free functions
// ============================================================================

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_deserialize_feature_config(
    fstr: RustBuffer,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        let features = super::deserialize_feature_config(&lift_string(fstr)?)?;
        Ok(lower_into_buffer(&Json(features))?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_deserialize_meshnet_config(
    cfg_str: RustBuffer,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        let cfg = super::deserialize_meshnet_config(&lift_string(cfg_str)?)?;
        Ok(lower_into_buffer(&Json(cfg))?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_generate_public_key(
    secret_key: RustBuffer,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        let secret: SecretKey = lift_string(secret_key)?
            .parse()
            .map_err(|e| CallError::unexpected(format!("{e}")))?;
        Ok(lower_string(super::generate_public_key(secret).to_string())?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_generate_secret_key(
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        Ok(lower_string(super::generate_secret_key().to_string())?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_get_commit_sha(call_status: *mut RustCallStatus) -> RustBuffer {
    rust_call(call_status, || Ok(lower_string(super::get_commit_sha())?))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_get_default_adapter(
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || Ok(lower_into_buffer(&super::get_default_adapter())?))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_get_default_feature_config(
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        Ok(lower_into_buffer(&Json(super::get_default_feature_config()))?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_get_version_tag(call_status: *mut RustCallStatus) -> RustBuffer {
    rust_call(call_status, || Ok(lower_string(super::get_version_tag())?))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_func_set_global_logger(
    log_level: RustBuffer,
    logger: u64,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let logger = Arc::new(ForeignLoggerCb::new(logger));
        let level: TelioLogLevel = lift_from_buffer(log_level)?;
        super::set_global_logger(level, logger);
        Ok(())
    })
}

// ============================================================================
// Object lifecycle
// ============================================================================

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_constructor_telio_new(
    features: RustBuffer,
    events: u64,
    call_status: *mut RustCallStatus,
) -> u64 {
    rust_call(call_status, || {
        let events = Arc::new(ForeignEventCb::new(events));
        let Json(features) = lift_from_buffer::<Json<Features>>(features)?;
        let telio = Telio::new(features, events)?;
        Ok(DEVICES.insert(Arc::new(telio))?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_constructor_telio_new_with_protect(
    features: RustBuffer,
    events: u64,
    protect: u64,
    call_status: *mut RustCallStatus,
) -> u64 {
    rust_call(call_status, || {
        let events = Arc::new(ForeignEventCb::new(events));
        let protect = Arc::new(ForeignProtectCb::new(protect));
        let Json(features) = lift_from_buffer::<Json<Features>>(features)?;
        let telio = Telio::new_with_protect(features, events, protect)?;
        Ok(DEVICES.insert(Arc::new(telio))?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_free_telio(handle: u64, call_status: *mut RustCallStatus) {
    rust_call(call_status, || {
        drop(DEVICES.remove(handle)?);
        Ok(())
    })
}

// ============================================================================
// Methods
// ============================================================================

/// Methods that take no arguments beyond the device and return nothing.
macro_rules! unit_methods {
    ($($export:ident => $method:ident;)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $export(handle: u64, call_status: *mut RustCallStatus) {
                rust_call(call_status, || Ok(device(handle)?.$method()?))
            }
        )*
    };
}

unit_methods! {
    uniffi_telio_fn_method_telio_disable_magic_dns => disable_magic_dns;
    uniffi_telio_fn_method_telio_disconnect_from_exit_nodes => disconnect_from_exit_nodes;
    uniffi_telio_fn_method_telio_generate_stack_panic => generate_stack_panic;
    uniffi_telio_fn_method_telio_generate_thread_panic => generate_thread_panic;
    uniffi_telio_fn_method_telio_notify_sleep => notify_sleep;
    uniffi_telio_fn_method_telio_notify_wakeup => notify_wakeup;
    uniffi_telio_fn_method_telio_set_meshnet_off => set_meshnet_off;
    uniffi_telio_fn_method_telio_shutdown => shutdown;
    uniffi_telio_fn_method_telio_shutdown_hard => shutdown_hard;
    uniffi_telio_fn_method_telio_stop => stop;
    uniffi_telio_fn_method_telio_trigger_analytics_event => trigger_analytics_event;
    uniffi_telio_fn_method_telio_trigger_qos_collection => trigger_qos_collection;
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_start(
    handle: u64,
    secret_key: RustBuffer,
    adapter: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [secret_key, adapter] = take_buffers([secret_key, adapter])?;
        let telio = device(handle)?;
        let adapter: TelioAdapterType = lift_from_bytes(&adapter)?;
        let secret_key = lift_key(secret_key)?;
        Ok(telio.start(secret_key, adapter)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_start_named(
    handle: u64,
    secret_key: RustBuffer,
    adapter: RustBuffer,
    name: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [secret_key, adapter, name] = take_buffers([secret_key, adapter, name])?;
        let telio = device(handle)?;
        let adapter: TelioAdapterType = lift_from_bytes(&adapter)?;
        let name = lift_utf8(name)?;
        let secret_key = lift_key(secret_key)?;
        Ok(telio.start_named(secret_key, adapter, name)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_start_with_tun(
    handle: u64,
    secret_key: RustBuffer,
    adapter: RustBuffer,
    tun: i32,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [secret_key, adapter] = take_buffers([secret_key, adapter])?;
        let telio = device(handle)?;
        let adapter: TelioAdapterType = lift_from_bytes(&adapter)?;
        let secret_key = lift_key(secret_key)?;
        Ok(telio.start_with_tun(secret_key, adapter, tun)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_is_running(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> i8 {
    rust_call(call_status, || Ok(device(handle)?.is_running() as i8))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_set_secret_key(
    handle: u64,
    secret_key: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [secret_key] = take_buffers([secret_key])?;
        let telio = device(handle)?;
        Ok(telio.set_secret_key(lift_key(secret_key)?)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_get_secret_key(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        Ok(lower_string(device(handle)?.get_secret_key().to_string())?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_set_fwmark(
    handle: u64,
    fwmark: u32,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || Ok(device(handle)?.set_fwmark(fwmark)?))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_get_adapter_luid(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> u64 {
    rust_call(call_status, || Ok(device(handle)?.get_adapter_luid()))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_get_last_error(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || Ok(lower_string(device(handle)?.get_last_error())?))
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_get_status_map(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        let nodes: Vec<Json<TelioNode>> =
            device(handle)?.get_status_map().into_iter().map(Json).collect();
        Ok(lower_into_buffer(&nodes)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_set_meshnet(
    handle: u64,
    cfg: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [cfg] = take_buffers([cfg])?;
        let telio = device(handle)?;
        let Json(cfg) = lift_from_bytes::<Json<Config>>(&cfg)?;
        Ok(telio.set_meshnet(cfg)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_connect_to_exit_node(
    handle: u64,
    public_key: RustBuffer,
    allowed_ips: RustBuffer,
    endpoint: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [public_key, allowed_ips, endpoint] =
            take_buffers([public_key, allowed_ips, endpoint])?;
        let telio = device(handle)?;
        let allowed_ips: Option<Vec<IpNet>> = lift_from_bytes(&allowed_ips)?;
        let endpoint = lift_endpoint(&endpoint)?;
        let public_key: PublicKey = lift_key(public_key)?;
        Ok(telio.connect_to_exit_node(public_key, allowed_ips, endpoint)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_connect_to_exit_node_with_id(
    handle: u64,
    identifier: RustBuffer,
    public_key: RustBuffer,
    allowed_ips: RustBuffer,
    endpoint: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [identifier, public_key, allowed_ips, endpoint] =
            take_buffers([identifier, public_key, allowed_ips, endpoint])?;
        let telio = device(handle)?;
        let identifier: Option<String> = lift_from_bytes(&identifier)?;
        let allowed_ips: Option<Vec<IpNet>> = lift_from_bytes(&allowed_ips)?;
        let endpoint = lift_endpoint(&endpoint)?;
        let public_key: PublicKey = lift_key(public_key)?;
        Ok(telio.connect_to_exit_node_with_id(identifier, public_key, allowed_ips, endpoint)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_connect_to_exit_node_postquantum(
    handle: u64,
    identifier: RustBuffer,
    public_key: RustBuffer,
    allowed_ips: RustBuffer,
    endpoint: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [identifier, public_key, allowed_ips, endpoint] =
            take_buffers([identifier, public_key, allowed_ips, endpoint])?;
        let telio = device(handle)?;
        let identifier: Option<String> = lift_from_bytes(&identifier)?;
        let allowed_ips: Option<Vec<IpNet>> = lift_from_bytes(&allowed_ips)?;
        let endpoint = lift_endpoint(&endpoint)?;
        let public_key: PublicKey = lift_key(public_key)?;
        Ok(telio.connect_to_exit_node_postquantum(identifier, public_key, allowed_ips, endpoint)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_disconnect_from_exit_node(
    handle: u64,
    public_key: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [public_key] = take_buffers([public_key])?;
        let telio = device(handle)?;
        Ok(telio.disconnect_from_exit_node(lift_key(public_key)?)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_enable_magic_dns(
    handle: u64,
    forward_servers: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [forward_servers] = take_buffers([forward_servers])?;
        let telio = device(handle)?;
        let servers: Vec<String> = lift_from_bytes(&forward_servers)?;
        let servers = servers
            .iter()
            .map(|s| lift_ip(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(telio.enable_magic_dns(servers)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_notify_network_change(
    handle: u64,
    network_info: RustBuffer,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let [network_info] = take_buffers([network_info])?;
        let telio = device(handle)?;
        Ok(telio.notify_network_change(lift_utf8(network_info)?)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_get_nat(
    handle: u64,
    ip: RustBuffer,
    port: u16,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || {
        let [ip] = take_buffers([ip])?;
        let telio = device(handle)?;
        let nat = telio.get_nat(&lift_utf8(ip)?, port)?;
        Ok(lower_into_buffer(&nat)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_probe_pmtu(
    handle: u64,
    host: RustBuffer,
    call_status: *mut RustCallStatus,
) -> u32 {
    rust_call(call_status, || {
        let [host] = take_buffers([host])?;
        let telio = device(handle)?;
        let host = lift_ip(&lift_utf8(host)?)?;
        Ok(telio.probe_pmtu(host)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_method_telio_receive_ping(
    handle: u64,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || Ok(lower_string(device(handle)?.receive_ping()?)?))
}
