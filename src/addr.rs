use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Logical port number tunneled inside segment payloads. Not a UDP port.
pub type Port = u16;

/// A virtual IP address: an opaque short identifier such as `HOST_A`. It is
/// deliberately not parseable as a real IP address.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vip(pub String);

impl Vip {
    pub fn new(s: impl Into<String>) -> Vip {
        Vip(s.into())
    }
}

impl Display for Vip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for Vip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A MAC address: six colon-separated hex octets, e.g. `AA:AA:AA:AA:AA:AA`.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mac(pub String);

impl Mac {
    pub fn new(s: impl Into<String>) -> Mac {
        let mac = Mac(s.into());
        debug_assert!(mac.is_well_formed(), "malformed MAC address {:?}", mac);
        mac
    }

    pub fn is_well_formed(&self) -> bool {
        let octets: Vec<&str> = self.0.split(':').collect();
        octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The end-to-end logical endpoint: a virtual IP plus a logical port.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct VirtualAddress {
    pub vip: Vip,
    pub port: Port,
}

impl VirtualAddress {
    pub fn new(vip: Vip, port: Port) -> VirtualAddress {
        VirtualAddress { vip, port }
    }
}

impl Display for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vip, self.port)
    }
}
impl Debug for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vip, self.port)
    }
}
