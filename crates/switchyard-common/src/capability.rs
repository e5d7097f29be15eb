//! Capabilities — semantic tags describing what a bearer provides.
//!
//! A capability is either a *service* tag (what kind of traffic the bearer
//! carries: internet, MMS, IMS signalling, …) or a *condition* tag (a
//! statement about the bearer's current quality: not metered, not roaming,
//! not suspended, …). Service tags are immutable for the lifetime of an
//! externally visible network handle — toggling one forces the handle to
//! be retired and re-registered. Condition tags mutate freely in place.

use serde::{Deserialize, Serialize};

/// A single capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    // Service tags (immutable on a live handle)
    Internet,
    Mms,
    Supl,
    Dun,
    Fota,
    Ims,
    Cbs,
    Xcap,
    Emergency,
    Enterprise,
    // Condition tags (mutable in place)
    NotMetered,
    TemporarilyNotMetered,
    NotCongested,
    NotSuspended,
    NotRoaming,
    NotRestricted,
}

impl Capability {
    /// All capabilities, in bit order.
    pub const ALL: [Capability; 16] = [
        Capability::Internet,
        Capability::Mms,
        Capability::Supl,
        Capability::Dun,
        Capability::Fota,
        Capability::Ims,
        Capability::Cbs,
        Capability::Xcap,
        Capability::Emergency,
        Capability::Enterprise,
        Capability::NotMetered,
        Capability::TemporarilyNotMetered,
        Capability::NotCongested,
        Capability::NotSuspended,
        Capability::NotRoaming,
        Capability::NotRestricted,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Whether this tag may change on a live handle without recreating it.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Capability::NotMetered
                | Capability::TemporarilyNotMetered
                | Capability::NotCongested
                | Capability::NotSuspended
                | Capability::NotRoaming
                | Capability::NotRestricted
        )
    }

    /// Demand priority contributed by this tag. A request's priority is the
    /// maximum over its capability set.
    pub fn priority(&self) -> u8 {
        match self {
            Capability::Emergency => 90,
            Capability::Ims => 40,
            Capability::Supl => 30,
            Capability::Mms => 25,
            Capability::Xcap | Capability::Cbs | Capability::Fota => 20,
            Capability::Dun | Capability::Enterprise => 15,
            Capability::Internet => 10,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Internet => "internet",
            Capability::Mms => "mms",
            Capability::Supl => "supl",
            Capability::Dun => "dun",
            Capability::Fota => "fota",
            Capability::Ims => "ims",
            Capability::Cbs => "cbs",
            Capability::Xcap => "xcap",
            Capability::Emergency => "emergency",
            Capability::Enterprise => "enterprise",
            Capability::NotMetered => "not_metered",
            Capability::TemporarilyNotMetered => "temporarily_not_metered",
            Capability::NotCongested => "not_congested",
            Capability::NotSuspended => "not_suspended",
            Capability::NotRoaming => "not_roaming",
            Capability::NotRestricted => "not_restricted",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Capability::ALL
            .iter()
            .find(|c| c.as_str() == needle)
            .copied()
            .ok_or_else(|| UnknownCapability(needle))
    }
}

/// Error returned when parsing an unknown capability name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0:?}")]
pub struct UnknownCapability(pub String);

/// A set of capabilities, stored as a bitmask.
///
/// Serializes as the `|`-separated list form (`"internet|mms"`) so policy
/// files stay readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn new() -> Self {
        Self::EMPTY
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.insert(cap);
        self
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        let had = self.contains(cap);
        self.0 |= cap.bit();
        !had
    }

    pub fn remove(&mut self, cap: Capability) -> bool {
        let had = self.contains(cap);
        self.0 &= !cap.bit();
        had
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// True when every capability in `other` is present in `self`.
    pub fn contains_all(&self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: CapabilitySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(&self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 | other.0)
    }

    pub fn difference(&self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & !other.0)
    }

    pub fn intersection(&self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(|c| self.contains(*c))
    }

    /// The service (immutable) tags in this set.
    pub fn services(&self) -> CapabilitySet {
        self.iter().filter(|c| !c.is_mutable()).collect()
    }

    /// The condition (mutable) tags in this set.
    pub fn conditions(&self) -> CapabilitySet {
        self.iter().filter(|c| c.is_mutable()).collect()
    }

    /// Highest demand priority across the set.
    pub fn priority(&self) -> u8 {
        self.iter().map(|c| c.priority()).max().unwrap_or(0)
    }

    /// Parse a `|`-separated capability list, e.g. `"internet|mms"`.
    pub fn parse_list(s: &str) -> Result<CapabilitySet, UnknownCapability> {
        s.split('|')
            .filter(|p| !p.trim().is_empty())
            .map(|p| p.parse::<Capability>())
            .collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::new();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl From<Capability> for CapabilitySet {
    fn from(cap: Capability) -> Self {
        CapabilitySet::new().with(cap)
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CapabilitySet::parse_list(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CapabilitySet({self})")
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for cap in self.iter() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(cap.as_str())?;
            first = false;
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}
