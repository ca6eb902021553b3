//! Witness scope flags constraining where a signature is valid.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope flags attached to a [`crate::Signer`].
///
/// Scopes combine as a bitmask, except `Global` which must stand alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WitnessScope(u8);

impl WitnessScope {
    /// Signature valid only for fee payment, nothing may use it.
    pub const NONE: WitnessScope = WitnessScope(0x00);
    /// Valid when the signer's account is the calling entry script.
    pub const CALLED_BY_ENTRY: WitnessScope = WitnessScope(0x01);
    /// Valid only inside the contracts listed on the signer.
    pub const CUSTOM_CONTRACTS: WitnessScope = WitnessScope(0x10);
    /// Valid only inside contracts belonging to the listed groups.
    pub const CUSTOM_GROUPS: WitnessScope = WitnessScope(0x20);
    /// Valid where the signer's witness rules allow it.
    pub const WITNESS_RULES: WitnessScope = WitnessScope(0x40);
    /// Valid everywhere. Mutually exclusive with every other flag.
    pub const GLOBAL: WitnessScope = WitnessScope(0x80);

    const VALID_MASK: u8 = 0x01 | 0x10 | 0x20 | 0x40 | 0x80;

    /// Validates and wraps a raw scope byte.
    pub fn from_byte(value: u8) -> CoreResult<Self> {
        if value & !Self::VALID_MASK != 0 {
            return Err(CoreError::invalid_data(format!(
                "unknown witness scope bits: {value:#04x}"
            )));
        }
        if value & 0x80 != 0 && value != 0x80 {
            return Err(CoreError::invalid_data(
                "Global scope cannot combine with other scopes",
            ));
        }
        Ok(Self(value))
    }

    /// The raw scope byte.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Whether this scope contains all bits of `other`.
    pub fn contains(&self, other: WitnessScope) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines two scopes.
    pub fn union(&self, other: WitnessScope) -> CoreResult<Self> {
        Self::from_byte(self.0 | other.0)
    }
}

impl Default for WitnessScope {
    fn default() -> Self {
        Self::CALLED_BY_ENTRY
    }
}

impl TryFrom<u8> for WitnessScope {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_byte(value)
    }
}

impl From<WitnessScope> for u8 {
    fn from(scope: WitnessScope) -> u8 {
        scope.bits()
    }
}

impl fmt::Display for WitnessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "None");
        }
        if *self == Self::GLOBAL {
            return write!(f, "Global");
        }
        let mut parts = Vec::new();
        if self.contains(Self::CALLED_BY_ENTRY) {
            parts.push("CalledByEntry");
        }
        if self.contains(Self::CUSTOM_CONTRACTS) {
            parts.push("CustomContracts");
        }
        if self.contains(Self::CUSTOM_GROUPS) {
            parts.push("CustomGroups");
        }
        if self.contains(Self::WITNESS_RULES) {
            parts.push("WitnessRules");
        }
        write!(f, "{}", parts.join(","))
    }
}
