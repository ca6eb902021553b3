//! Transaction signer with its witness scope.

use crate::uint160::UInt160;
use crate::witness_scope::WitnessScope;
use neoxide_io::{
    deserialize_vec, serialize_vec, var_int_size, BinaryWriter, IoError, IoResult, MemoryReader,
    Serializable,
};
use serde::{Deserialize, Serialize};

/// Maximum sub-items (allowed contracts or groups) per signer.
pub const MAX_SUBITEMS: usize = 16;

/// One signer of a transaction: the account to witness, and how far the
/// resulting signature may reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    /// The account whose witness must be present.
    pub account: UInt160,
    /// Where the witness is valid.
    pub scopes: WitnessScope,
    /// Contracts the witness covers, for `CustomContracts` scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_contracts: Vec<UInt160>,
    /// Contract groups (public keys) the witness covers, for `CustomGroups`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_groups: Vec<Vec<u8>>,
}

impl Signer {
    /// Creates a signer with the given account and scope.
    pub fn new(account: UInt160, scopes: WitnessScope) -> Self {
        Self {
            account,
            scopes,
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    /// A signer valid only when called by the entry script.
    pub fn called_by_entry(account: UInt160) -> Self {
        Self::new(account, WitnessScope::CALLED_BY_ENTRY)
    }

    /// A signer valid everywhere.
    pub fn global(account: UInt160) -> Self {
        Self::new(account, WitnessScope::GLOBAL)
    }
}

impl Serializable for Signer {
    fn size(&self) -> usize {
        let mut size = 20 + 1;
        if self.scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
            size += var_int_size(self.allowed_contracts.len() as u64)
                + self.allowed_contracts.len() * 20;
        }
        if self.scopes.contains(WitnessScope::CUSTOM_GROUPS) {
            size += var_int_size(self.allowed_groups.len() as u64)
                + self.allowed_groups.iter().map(|g| g.len()).sum::<usize>();
        }
        size
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        Serializable::serialize(&self.account, writer)?;
        writer.write_byte(self.scopes.bits());
        if self.scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
            if self.allowed_contracts.len() > MAX_SUBITEMS {
                return Err(IoError::length_exceeded(
                    self.allowed_contracts.len(),
                    MAX_SUBITEMS,
                    "allowed contracts",
                ));
            }
            serialize_vec(&self.allowed_contracts, writer)?;
        }
        if self.scopes.contains(WitnessScope::CUSTOM_GROUPS) {
            if self.allowed_groups.len() > MAX_SUBITEMS {
                return Err(IoError::length_exceeded(
                    self.allowed_groups.len(),
                    MAX_SUBITEMS,
                    "allowed groups",
                ));
            }
            writer.write_var_int(self.allowed_groups.len() as u64);
            for group in &self.allowed_groups {
                writer.write_bytes(group);
            }
        }
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let account = <UInt160 as Serializable>::deserialize(reader)?;
        let scope_byte = reader.read_byte()?;
        let scopes = WitnessScope::from_byte(scope_byte)
            .map_err(|e| IoError::invalid_data("witness scope", e.to_string()))?;

        let allowed_contracts = if scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
            deserialize_vec(reader, MAX_SUBITEMS)?
        } else {
            Vec::new()
        };
        let allowed_groups = if scopes.contains(WitnessScope::CUSTOM_GROUPS) {
            let count = reader.read_var_int(MAX_SUBITEMS as u64)? as usize;
            let mut groups = Vec::with_capacity(count);
            for _ in 0..count {
                groups.push(reader.read_bytes(crate::crypto::PUBLIC_KEY_SIZE)?);
            }
            groups
        } else {
            Vec::new()
        };

        Ok(Self {
            account,
            scopes,
            allowed_contracts,
            allowed_groups,
        })
    }
}
