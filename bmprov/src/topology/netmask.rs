use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use crate::topology::TopologyError;

/// An ipv4 network in cidr notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl FromStr for Ipv4Cidr {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TopologyError::InvalidCidr(s.to_string());
        let (address, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let address = Ipv4Addr::from_str(address).map_err(|_| invalid())?;
        let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        Ok(Self { address, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

impl Ipv4Cidr {
    pub fn mask_bits(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - p as u32),
        }
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask_bits())
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !self.mask_bits())
    }

    /// nth address counted from the network address
    pub fn nth(&self, n: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()).saturating_add(n))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask_bits() == u32::from(self.network())
    }
}

/// `192.168.1.0/24` -> `255.255.255.0`
pub fn cidr_to_netmask(cidr: &str) -> Result<String, TopologyError> {
    let cidr = Ipv4Cidr::from_str(cidr)?;
    Ok(cidr.netmask().to_string())
}

/// Prefix length of a dotted netmask, counting the set bits of each octet
pub fn netmask_prefix_len(netmask: &str) -> Result<u32, TopologyError> {
    let mask = Ipv4Addr::from_str(netmask.trim())
        .map_err(|_| TopologyError::InvalidCidr(netmask.to_string()))?;
    Ok(mask.octets().iter().map(|o| o.count_ones()).sum())
}
