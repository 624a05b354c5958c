//! Endpoint URL handling: normalization, per-service URLs, and
//! discovery-record resolution with protocol-default fallback.

use std::collections::{BTreeMap, HashMap};

use beacon_resolver::RecordResolver;
use tracing::{debug, warn};
use url::Url;

use crate::error::ProviderError;

/// Parses the configured endpoint address.
///
/// A missing scheme defaults to `ws`. Any query or fragment on the base
/// endpoint is dropped; per-service metadata owns the query string.
pub(crate) fn normalize_endpoint(endpoint: &str) -> Result<Url, ProviderError> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let mut url = Url::parse(&with_scheme)?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ProviderError::UnsupportedScheme(other.to_string())),
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// True when the endpoint text names a port in its authority.
///
/// `Url::port()` answers `None` for scheme-default ports, so a parsed
/// `ws://host:80` looks portless and would go through resolution; the
/// raw text is the only place the distinction survives.
pub(crate) fn names_explicit_port(endpoint: &str) -> bool {
    let after_scheme = match endpoint.split_once("://") {
        Some((_, rest)) => rest,
        None => endpoint,
    };
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    // For bracketed IPv6 hosts only a colon after the bracket is a port.
    let host_port = match authority.rsplit_once(']') {
        Some((_, rest)) => rest,
        None => authority,
    };
    match host_port.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Builds the connection URL for one service registration.
///
/// The discovery endpoint reads the announcement from the query string:
/// `service=<name>&port=<port>` plus every caller-supplied option,
/// URL-encoded. Options are appended in key order; `service` and `port`
/// are reserved for the announcement values.
pub(crate) fn service_url(
    base: &Url,
    name: &str,
    port: u16,
    options: Option<&HashMap<String, String>>,
) -> Url {
    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("service", name);
        pairs.append_pair("port", &port.to_string());
        if let Some(options) = options {
            let sorted: BTreeMap<&String, &String> = options.iter().collect();
            for (key, value) in sorted {
                if matches!(key.as_str(), "service" | "port") {
                    continue;
                }
                pairs.append_pair(key, value);
            }
        }
    }
    url
}

/// Resolves the concrete endpoint for one connect attempt.
///
/// An explicit port skips resolution entirely; `explicit_port` keeps
/// that promise for scheme-default ports the parser normalized away.
/// Otherwise the host is looked up through the discovery-record
/// resolver and the URL rebuilt around the answered target, keeping
/// path and query. A failed or empty lookup falls back to the protocol
/// default port (80 for `ws`, 443 for `wss`). Runs on every attempt,
/// reconnects included.
pub(crate) async fn resolve(url: &Url, explicit_port: bool, resolver: &dyn RecordResolver) -> Url {
    if explicit_port || url.port().is_some() {
        return url.clone();
    }
    let Some(host) = url.host_str() else {
        return url.clone();
    };

    match resolver.lookup(host).await {
        Ok(Some(target)) => {
            let mut resolved = url.clone();
            if resolved.set_host(Some(&target.host)).is_ok()
                && resolved.set_port(Some(target.port)).is_ok()
            {
                debug!(%host, target = %target.host, port = target.port, "resolved endpoint");
                return resolved;
            }
            warn!(%host, target = %target.host, "unusable record target, using protocol default port");
        }
        Ok(None) => {
            debug!(%host, "no discovery record, using protocol default port");
        }
        Err(e) => {
            debug!(%host, error = %e, "record lookup failed, using protocol default port");
        }
    }

    let mut fallback = url.clone();
    let _ = fallback.set_port(Some(default_port(url.scheme())));
    fallback
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "wss" { 443 } else { 80 }
}
