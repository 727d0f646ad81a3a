use crate::error::{NftError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// nftables protocol family of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Ip6 => "ip6",
            Self::Inet => "inet",
            Self::Arp => "arp",
            Self::Bridge => "bridge",
            Self::Netdev => "netdev",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = NftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ip" => Ok(Self::Ip),
            "ip6" => Ok(Self::Ip6),
            "inet" => Ok(Self::Inet),
            "arp" => Ok(Self::Arp),
            "bridge" => Ok(Self::Bridge),
            "netdev" => Ok(Self::Netdev),
            other => Err(NftError::validation(
                "family",
                format!("unknown family {:?}", other),
            )),
        }
    }
}

/// Base chain type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseChainType {
    Filter,
    Nat,
    Route,
}

impl BaseChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
            Self::Route => "route",
        }
    }
}

impl fmt::Display for BaseChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseChainType {
    type Err = NftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filter" => Ok(Self::Filter),
            "nat" => Ok(Self::Nat),
            "route" => Ok(Self::Route),
            other => Err(NftError::validation(
                "chain",
                format!("unknown chain type {:?}", other),
            )),
        }
    }
}

/// Hook a base chain is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseChainHook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
    Ingress,
    Egress,
}

impl BaseChainHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prerouting => "prerouting",
            Self::Input => "input",
            Self::Forward => "forward",
            Self::Output => "output",
            Self::Postrouting => "postrouting",
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }

    /// Hooks that bind to a network device
    pub fn takes_device(&self) -> bool {
        matches!(self, Self::Ingress | Self::Egress)
    }
}

impl fmt::Display for BaseChainHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseChainHook {
    type Err = NftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prerouting" => Ok(Self::Prerouting),
            "input" => Ok(Self::Input),
            "forward" => Ok(Self::Forward),
            "output" => Ok(Self::Output),
            "postrouting" => Ok(Self::Postrouting),
            "ingress" => Ok(Self::Ingress),
            "egress" => Ok(Self::Egress),
            other => Err(NftError::validation(
                "chain",
                format!("unknown hook {:?}", other),
            )),
        }
    }
}

pub const RAW_PRIORITY: &str = "raw";
pub const MANGLE_PRIORITY: &str = "mangle";
pub const DNAT_PRIORITY: &str = "dstnat";
pub const FILTER_PRIORITY: &str = "filter";
pub const SECURITY_PRIORITY: &str = "security";
pub const SNAT_PRIORITY: &str = "srcnat";

const NUMERIC_PRIORITIES: &[(&str, i32)] = &[
    ("raw", -300),
    ("mangle", -150),
    ("dstnat", -100),
    ("filter", 0),
    ("security", 50),
    ("srcnat", 100),
];

const BRIDGE_NUMERIC_PRIORITIES: &[(&str, i32)] = &[
    ("dstnat", -300),
    ("filter", -200),
    ("out", 100),
    ("srcnat", 300),
];

/// Convert the string form of a chain priority ("filter", "srcnat+1", "-150") into a number
pub fn parse_priority(family: Family, priority: &str) -> Result<i32> {
    if let Ok(value) = priority.parse::<i32>() {
        return Ok(value);
    }

    let (name, modifier) = match priority.find(['+', '-']) {
        Some(idx) => {
            let modifier = &priority[idx..];
            let value = modifier.parse::<i32>().map_err(|e| {
                NftError::validation(
                    "priority",
                    format!("could not parse modifier {:?}: {}", modifier, e),
                )
            })?;
            (&priority[..idx], value)
        }
        None => (priority, 0),
    };

    let table = if family == Family::Bridge {
        BRIDGE_NUMERIC_PRIORITIES
    } else {
        NUMERIC_PRIORITIES
    };

    let (_, value) = table
        .iter()
        .find(|(known, _)| *known == name)
        .ok_or_else(|| NftError::validation("priority", format!("unknown priority {:?}", name)))?;
    value
        .checked_add(modifier)
        .ok_or_else(|| NftError::validation("priority", format!("priority {:?} is out of range", priority)))
}
