//! Remote address resolution for client spans.
//!
//! Peer naming conventions have been renamed several times; the chain below
//! checks newest-to-oldest so freshly instrumented services resolve first
//! while old telemetry keeps working.

use crate::metrics::span::{find_attribute, render_value};
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::Span;

const RPC_SYSTEM: &str = "rpc.system";
const RPC_SERVICE: &str = "rpc.service";
const RPC_METHOD: &str = "rpc.method";
const HTTP_HOST: &str = "http.host";
const HTTP_URL: &str = "http.url";
const URL_FULL: &str = "url.full";
const PEER_SERVICE: &str = "peer.service";

// (address, port) attribute generations, newest convention last in history
// but checked in the readable-name-first order the original used.
const PEER_PAIRS: [(&str, &str); 5] = [
    ("net.peer.name", "net.peer.port"),
    ("server.address", "server.port"),
    ("net.peer.ip", "net.peer.port"),
    ("net.sock.peer.addr", "net.sock.peer.port"),
    ("network.peer.address", "network.peer.port"),
];

fn rendered(attrs: &[KeyValue], name: &str) -> Option<String> {
    find_attribute(attrs, name).map(render_value)
}

fn peer_address(attrs: &[KeyValue]) -> Option<String> {
    for (address_key, port_key) in PEER_PAIRS {
        if let Some(mut address) = rendered(attrs, address_key) {
            if let Some(port) = rendered(attrs, port_key) {
                address.push(':');
                address.push_str(&port);
            }
            return Some(address);
        }
    }
    None
}

/// Extracts the host (and port) part of a URL-shaped value. Values without
/// an http scheme are treated as scheme-relative. An empty host resolves to
/// nothing.
fn url_host(value: &str) -> Option<String> {
    let after_scheme = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .unwrap_or(value);
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Resolves the remote address a client span talked to, in priority order:
/// RPC service/method composition, explicit HTTP host, the peer-attribute
/// generations, full-URL host extraction, and finally the legacy peer
/// service name.
pub fn remote_address(span: &Span) -> Option<String> {
    let attrs = &span.attributes;

    if find_attribute(attrs, RPC_SYSTEM).is_some() {
        let mut address = rendered(attrs, RPC_SERVICE).unwrap_or_default();
        if let Some(method) = rendered(attrs, RPC_METHOD) {
            address.push('/');
            address.push_str(&method);
        }
        if !address.is_empty() {
            return Some(address);
        }
        // RPC spans without service/method fall back to the peer chain.
        return peer_address(attrs);
    }

    if let Some(host) = rendered(attrs, HTTP_HOST) {
        return Some(host);
    }

    if let Some(address) = peer_address(attrs) {
        return Some(address);
    }

    if let Some(url) = rendered(attrs, HTTP_URL).or_else(|| rendered(attrs, URL_FULL)) {
        return url_host(&url);
    }

    rendered(attrs, PEER_SERVICE)
}
