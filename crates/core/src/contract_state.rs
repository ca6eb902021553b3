//! Deployed-contract state as read from the snapshot.

use crate::uint160::UInt160;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One callable method from a contract's ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMethod {
    /// Method name.
    pub name: String,
    /// Entry offset into the contract script.
    pub offset: usize,
    /// Number of declared parameters.
    pub parameters: usize,
    /// Whether the method may write state.
    #[serde(default)]
    pub safe: bool,
}

/// The subset of a contract manifest the core consumes: the ABI method
/// table plus the raw manifest document for RPC passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractManifest {
    /// Contract display name.
    pub name: String,
    /// Callable methods.
    pub methods: Vec<ContractMethod>,
    /// The full manifest JSON as deployed.
    #[serde(default)]
    pub raw: Value,
}

impl ContractManifest {
    /// Looks up a method by name and parameter count.
    pub fn method(&self, name: &str, parameters: usize) -> Option<&ContractMethod> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.parameters == parameters)
            .or_else(|| self.methods.iter().find(|m| m.name == name))
    }
}

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    /// Sequential contract id; negative ids are native contracts.
    pub id: i32,
    /// Times the contract has been updated.
    pub update_counter: u16,
    /// The contract's script hash.
    pub hash: UInt160,
    /// The executable script (NEF payload).
    #[serde(with = "crate::serde_base64")]
    pub script: Vec<u8>,
    /// The manifest.
    pub manifest: ContractManifest,
}

impl ContractState {
    /// Whether this is a native contract.
    pub fn is_native(&self) -> bool {
        self.id < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_lookup_prefers_exact_arity() {
        let manifest = ContractManifest {
            name: "token".into(),
            methods: vec![
                ContractMethod {
                    name: "transfer".into(),
                    offset: 0,
                    parameters: 4,
                    safe: false,
                },
                ContractMethod {
                    name: "transfer".into(),
                    offset: 64,
                    parameters: 2,
                    safe: false,
                },
            ],
            raw: Value::Null,
        };
        assert_eq!(manifest.method("transfer", 2).unwrap().offset, 64);
        assert_eq!(manifest.method("transfer", 3).unwrap().offset, 0);
        assert!(manifest.method("mint", 0).is_none());
    }
}
