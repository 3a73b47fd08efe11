//! The local network a flow is measured against.
//!
//! Parsed once at startup and only ever read afterwards, so a single
//! instance can be shared across tasks without locking.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ConfigError;

/// A single CIDR block, stored with its host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNetwork {
    network: IpAddr,
    prefix: u8,
}

impl LocalNetwork {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, ConfigError> {
        let network = match addr {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(ConfigError::InvalidPrefix {
                        addr: addr.to_string(),
                        prefix,
                    });
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix)))
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(ConfigError::InvalidPrefix {
                        addr: addr.to_string(),
                        prefix,
                    });
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix)))
            }
        };
        Ok(LocalNetwork { network, prefix })
    }

    /// Membership test. Addresses of the other family never match.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(*ip) & v4_mask(self.prefix) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(*ip) & v6_mask(self.prefix) == u128::from(net)
            }
            _ => false,
        }
    }

    /// Same as [`contains`](Self::contains), but an unparsed address is never local.
    pub fn contains_opt(&self, addr: Option<&IpAddr>) -> bool {
        addr.map_or(false, |ip| self.contains(ip))
    }
}

fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0)
}

fn v6_mask(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0)
}

impl FromStr for LocalNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        LocalNetwork::new(addr, prefix)
    }
}

impl fmt::Display for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
