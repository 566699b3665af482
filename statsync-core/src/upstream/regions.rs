use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorDetails};

/// A platform region, which is also the host (and scheduler partition) for
/// platform-scoped endpoints such as summoner-v4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Euw1,
    Eun1,
    Tr1,
    Ru,
    Na1,
    La1,
    La2,
    Br1,
    Kr,
    Jp1,
    Oc1,
    Ph2,
    Sg2,
    Th2,
    Tw2,
    Vn2,
}

/// A regional routing cluster, the host (and scheduler partition) for match-v5 and
/// account-v1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Routing {
    Americas,
    Asia,
    Europe,
}

impl Region {
    pub const ALL: [Region; 16] = [
        Region::Euw1,
        Region::Eun1,
        Region::Tr1,
        Region::Ru,
        Region::Na1,
        Region::La1,
        Region::La2,
        Region::Br1,
        Region::Kr,
        Region::Jp1,
        Region::Oc1,
        Region::Ph2,
        Region::Sg2,
        Region::Th2,
        Region::Tw2,
        Region::Vn2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Euw1 => "euw1",
            Region::Eun1 => "eun1",
            Region::Tr1 => "tr1",
            Region::Ru => "ru",
            Region::Na1 => "na1",
            Region::La1 => "la1",
            Region::La2 => "la2",
            Region::Br1 => "br1",
            Region::Kr => "kr",
            Region::Jp1 => "jp1",
            Region::Oc1 => "oc1",
            Region::Ph2 => "ph2",
            Region::Sg2 => "sg2",
            Region::Th2 => "th2",
            Region::Tw2 => "tw2",
            Region::Vn2 => "vn2",
        }
    }

    pub fn routing(self) -> Routing {
        match self {
            Region::Euw1 | Region::Eun1 | Region::Tr1 | Region::Ru => Routing::Europe,
            Region::Na1 | Region::La1 | Region::La2 | Region::Br1 => Routing::Americas,
            Region::Kr
            | Region::Jp1
            | Region::Oc1
            | Region::Ph2
            | Region::Sg2
            | Region::Th2
            | Region::Tw2
            | Region::Vn2 => Routing::Asia,
        }
    }

    /// Resolves the platform id carried in match payloads (e.g. `EUW1`).
    pub fn from_platform_id(platform_id: &str) -> Option<Region> {
        Self::lookup(platform_id)
    }

    fn lookup(name: &str) -> Option<Region> {
        let normalized = name.trim().to_ascii_lowercase();
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == normalized)
    }
}

impl Routing {
    pub fn as_str(self) -> &'static str {
        match self {
            Routing::Americas => "americas",
            Routing::Asia => "asia",
            Routing::Europe => "europe",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::lookup(s).ok_or_else(|| {
            Error::new(ErrorDetails::InvalidRegion {
                region: s.to_string(),
            })
        })
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
