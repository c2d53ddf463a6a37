//! [`PeerAllowList`] – connection-level access control.
//!
//! Before the server role writes a single byte to a new connection it calls
//! [`PeerAllowList::check`] with the peer address.  A peer that is not listed
//! gets [`LinkError::Rejected`] and the connection must be closed without any
//! processing.  An empty list admits everyone.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use armlink_types::LinkError;
use tracing::debug;

/// Set of peer IP addresses allowed to connect.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are treated as the IPv4
/// address they carry.
///
/// # Example
///
/// ```
/// use armlink_kernel::access::PeerAllowList;
///
/// let mut list = PeerAllowList::new();
/// assert!(list.check(&"10.0.0.5:40000".parse().unwrap()).is_ok()); // open
///
/// list.allow("192.168.168.76".parse().unwrap());
/// assert!(list.check(&"192.168.168.76:51000".parse().unwrap()).is_ok());
/// assert!(list.check(&"10.0.0.5:40000".parse().unwrap()).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PeerAllowList {
    allowed: HashSet<IpAddr>,
}

impl PeerAllowList {
    /// An empty (open) list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `ip`.  Duplicate entries are ignored.
    pub fn allow(&mut self, ip: IpAddr) {
        self.allowed.insert(ip.to_canonical());
    }

    /// Stop admitting `ip`.  No-op if it was never listed.
    pub fn revoke(&mut self, ip: &IpAddr) {
        self.allowed.remove(&ip.to_canonical());
    }

    /// `true` when no filtering is applied.
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Return `Ok(())` when `peer` may be served, or
    /// [`LinkError::Rejected`] otherwise.
    pub fn check(&self, peer: &SocketAddr) -> Result<(), LinkError> {
        if self.is_open() || self.allowed.contains(&peer.ip().to_canonical()) {
            Ok(())
        } else {
            debug!(%peer, allowed = self.allowed.len(), "peer not on allow-list");
            Err(LinkError::Rejected {
                peer: peer.to_string(),
            })
        }
    }
}

impl FromIterator<IpAddr> for PeerAllowList {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        let mut list = Self::new();
        for ip in iter {
            list.allow(ip);
        }
        list
    }
}
