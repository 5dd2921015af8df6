//! SSRF and path-traversal protection for config resolution.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),
    #[error("Access to loopback address denied: {0}")]
    LoopbackDenied(String),
    #[error("Access to private IP address denied: {0}")]
    PrivateIpDenied(String),
    #[error("Host not on the allowed domain list: {0}")]
    DomainNotAllowed(String),
    #[error("Path traversal detected: {path} escapes {base}")]
    PathTraversal { path: String, base: String },
}

/// Classifies an address against the block list. IPv4-mapped IPv6 is
/// normalized first so `::ffff:127.0.0.1` is judged by the IPv4 rules.
fn address_denial(ip: IpAddr) -> Option<SecurityError> {
    let ip = match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    };

    let loopback_or_unspecified = match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    };
    if loopback_or_unspecified {
        return Some(SecurityError::LoopbackDenied(ip.to_string()));
    }

    let private = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        // fc00::/7 unique-local plus fe80::/10 link-local.
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00 || v6.is_unicast_link_local(),
    };
    private.then(|| SecurityError::PrivateIpDenied(ip.to_string()))
}

/// Validates a config-server URL before any request is issued.
///
/// Only HTTP/HTTPS are accepted. `localhost` and literal loopback/private
/// addresses are refused. A non-empty `allowed_domains` list restricts
/// domain hosts to exact matches or subdomains of the listed entries.
pub fn validate_url(
    url: &Url,
    allowed_domains: &[String],
    allow_local: bool,
) -> Result<(), SecurityError> {
    if allow_local {
        return Ok(());
    }

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SecurityError::InvalidScheme(url.scheme().to_string()));
    }

    match url.host() {
        Some(url::Host::Domain(domain)) => {
            if domain == "localhost" {
                return Err(SecurityError::LoopbackDenied(domain.to_string()));
            }
            if !allowed_domains.is_empty() && !domain_allowed(domain, allowed_domains) {
                return Err(SecurityError::DomainNotAllowed(domain.to_string()));
            }
        }
        Some(url::Host::Ipv4(v4)) => {
            if let Some(denial) = address_denial(IpAddr::V4(v4)) {
                return Err(denial);
            }
        }
        Some(url::Host::Ipv6(v6)) => {
            if let Some(denial) = address_denial(IpAddr::V6(v6)) {
                return Err(denial);
            }
        }
        None => {}
    }

    Ok(())
}

/// Applies the same block list to DNS-resolved addresses, so a hostile
/// record cannot route a validated hostname to a private address.
pub fn validate_resolved_addresses(
    addresses: impl IntoIterator<Item = IpAddr>,
) -> Result<(), SecurityError> {
    for ip in addresses {
        if let Some(denial) = address_denial(ip) {
            return Err(denial);
        }
    }
    Ok(())
}

fn domain_allowed(domain: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        domain == entry
            || domain
                .strip_suffix(entry.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Validates that a local config directory resolves under one of the
/// allowed base directories, blocking `..` traversal through symlinks or
/// relative segments.
pub fn validate_config_dir(
    config_dir: &Path,
    allowed_roots: &[PathBuf],
) -> Result<PathBuf, SecurityError> {
    let canonical = config_dir
        .canonicalize()
        .map_err(|_| SecurityError::PathTraversal {
            path: config_dir.to_string_lossy().to_string(),
            base: allowed_roots
                .first()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        })?;

    for root in allowed_roots {
        if let Ok(root_canonical) = root.canonicalize()
            && canonical.starts_with(&root_canonical)
        {
            return Ok(canonical);
        }
    }

    Err(SecurityError::PathTraversal {
        path: canonical.to_string_lossy().to_string(),
        base: allowed_roots
            .first()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
    })
}
