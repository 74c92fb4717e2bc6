//! Lease records extracted from the lease file

use std::fmt;
use std::fmt::Write as _;
use std::net::IpAddr;

/// A hostname to address binding found in the lease file
///
/// Leases are plain values: two leases are equal when both name and
/// address match. They are only produced by the
/// [`LeaseParser`](crate::extractor::LeaseParser).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lease {
    name: String,
    address: IpAddr,
}

impl Lease {
    pub(crate) fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// The `client-hostname` of the lease
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The leased address
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Fixed-width hex encoding of the raw address bytes
    ///
    /// 8 characters for IPv4, 32 for IPv6. Used as the leaf key component
    /// so that bindings of one name to several addresses never collide.
    pub fn id(&self) -> String {
        lease_id(self.address)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Hex encoding of an address' raw bytes
pub fn lease_id(address: IpAddr) -> String {
    let bytes: Vec<u8> = match address {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
}

#[cfg(test)]
impl Lease {
    /// Construct a lease directly (tests only)
    pub(crate) fn for_test(name: &str, address: &str) -> Self {
        Self::new(name, address.parse().unwrap())
    }
}
