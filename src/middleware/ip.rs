//! Client identification for per-client rate limiting.
//!
//! # Key Selection
//!
//! The socket peer address is the client unless the peer is a trusted proxy:
//!
//! ```text
//!   ConnectInfo peer ──► in TRUSTED_PROXIES? ──yes──► X-Forwarded-For / X-Real-IP
//!         │                     │                          (first hop, else peer)
//!         │                     no
//!         │                     ▼
//!         │                 peer IP
//!         ▼
//!   no peer info (in-process tests) ──► headers, else "unknown"
//! ```
//!
//! With an empty `TRUSTED_PROXIES` list forwarded headers are ignored
//! entirely, so clients cannot rotate spoofed addresses to escape their
//! quota.
//!
//! ## The "unknown" Fallback
//!
//! When neither peer info nor headers are available, all such requests share
//! the `"unknown"` key and are collectively rate-limited.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a single-host range.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse().ok()?,
            None => max_prefix,
        };

        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Peers whose forwarded-for headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` lies in a configured range. Nothing is trusted when no
    /// ranges are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// First client address named by proxy headers, if any.
fn forwarded_ip<B>(req: &Request<B>) -> Option<&str> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return Some(first_ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim());
    }

    None
}

/// Socket peer recorded by the server for this request.
pub fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the rate-limit key for a request.
///
/// # Returns
///
/// `Cow<'static, str>` - Borrowed for "unknown" (no allocation), owned for actual IPs.
#[inline]
pub fn client_key<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    match peer_ip(req) {
        Some(peer) if trusted_proxies.is_trusted(&peer) => match forwarded_ip(req) {
            Some(ip) => {
                debug!(
                    peer = %peer,
                    client_ip = %ip,
                    "Using forwarded client IP from trusted proxy"
                );
                Cow::Owned(ip.to_string())
            }
            None => Cow::Owned(peer.to_string()),
        },
        Some(peer) => Cow::Owned(peer.to_string()),
        None => match forwarded_ip(req) {
            Some(ip) => Cow::Owned(ip.to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}
