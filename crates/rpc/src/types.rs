//! JSON renderings of domain objects and stack items.

use base64::Engine as _;
use neoxide_core::{script_hash_to_address, Block, BlockHeader, Crypto, Snapshot, Transaction};
use neoxide_io::SerializableExt;
use neoxide_vm::{ReferenceCounter, StackItem};
use serde_json::{json, Map, Value};

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Encodes a stack item using the `{type, value}` schema: Base64 for byte
/// values, decimal strings for integers, recursion for compounds, and a
/// key-stringified object for maps. Shared sub-graphs are rendered once
/// per occurrence; cycles degrade to a null value marker.
pub fn stack_item_to_json(item: &StackItem, rc: &ReferenceCounter) -> Value {
    let mut visiting = Vec::new();
    render_item(item, rc, &mut visiting)
}

fn render_item(item: &StackItem, rc: &ReferenceCounter, visiting: &mut Vec<usize>) -> Value {
    match item {
        StackItem::Null => json!({ "type": "Any", "value": Value::Null }),
        StackItem::Boolean(value) => json!({ "type": "Boolean", "value": value }),
        StackItem::Integer(value) => {
            json!({ "type": "Integer", "value": value.to_string() })
        }
        StackItem::ByteString(bytes) => json!({ "type": "ByteString", "value": b64(bytes) }),
        StackItem::Buffer(buffer) => json!({ "type": "Buffer", "value": b64(&buffer.to_vec()) }),
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            let tag = if matches!(item, StackItem::Struct(_)) {
                "Struct"
            } else {
                "Array"
            };
            let key = handle.index();
            if visiting.contains(&key) {
                return json!({ "type": tag, "value": Value::Null });
            }
            visiting.push(key);
            let elements: Vec<Value> = rc
                .seq_items(*handle)
                .map(|items| {
                    items
                        .iter()
                        .map(|element| render_item(element, rc, visiting))
                        .collect()
                })
                .unwrap_or_default();
            visiting.pop();
            json!({ "type": tag, "value": elements })
        }
        StackItem::Map(handle) => {
            let key = handle.index();
            if visiting.contains(&key) {
                return json!({ "type": "Map", "value": Value::Null });
            }
            visiting.push(key);
            let mut object = Map::new();
            if let Ok(entries) = rc.map_entries(*handle) {
                for (map_key, value) in entries {
                    let rendered_key = match &map_key {
                        neoxide_vm::MapKey::Boolean(b) => b.to_string(),
                        neoxide_vm::MapKey::Integer(i) => i.to_string(),
                        neoxide_vm::MapKey::ByteString(bytes) => b64(bytes),
                    };
                    object.insert(rendered_key, render_item(&value, rc, visiting));
                }
            }
            visiting.pop();
            json!({ "type": "Map", "value": Value::Object(object) })
        }
        StackItem::InteropInterface(object) => json!({
            "type": "InteropInterface",
            "interface": object.interface_type(),
        }),
        StackItem::Pointer(pointer) => json!({
            "type": "Pointer",
            "value": pointer.position.to_string(),
        }),
    }
}

/// JSON form of a transaction: Base64 body, or the verbose object.
pub fn transaction_to_json(
    tx: &Transaction,
    verbose: bool,
    crypto: &dyn Crypto,
    address_version: u8,
) -> Value {
    let bytes = tx.to_array().unwrap_or_default();
    if !verbose {
        return Value::String(b64(&bytes));
    }
    json!({
        "hash": tx.hash().to_hex_string(),
        "size": bytes.len(),
        "version": tx.version,
        "nonce": tx.nonce,
        "sender": tx.sender().map(|s| script_hash_to_address(crypto, &s, address_version)),
        "sysfee": tx.system_fee.to_string(),
        "netfee": tx.network_fee.to_string(),
        "validuntilblock": tx.valid_until_block,
        "signers": tx.signers.iter().map(|signer| json!({
            "account": signer.account.to_hex_string(),
            "scopes": signer.scopes.to_string(),
        })).collect::<Vec<_>>(),
        "attributes": tx.attributes,
        "script": b64(&tx.script),
        "witnesses": tx.witnesses.iter().map(|witness| json!({
            "invocation": b64(&witness.invocation_script),
            "verification": b64(&witness.verification_script),
        })).collect::<Vec<_>>(),
    })
}

/// JSON form of a block header (without transactions).
pub fn header_to_json(
    header: &BlockHeader,
    crypto: &dyn Crypto,
    address_version: u8,
    snapshot: &dyn Snapshot,
) -> Value {
    let hash = header.hash();
    let confirmations = snapshot.height().saturating_sub(header.index) + 1;
    json!({
        "hash": hash.to_hex_string(),
        "size": header.to_array().map(|b| b.len()).unwrap_or(0),
        "version": header.version,
        "previousblockhash": header.prev_hash.to_hex_string(),
        "merkleroot": header.merkle_root.to_hex_string(),
        "time": header.timestamp,
        "nonce": format!("{:016X}", header.nonce),
        "index": header.index,
        "primary": header.primary_index,
        "nextconsensus": script_hash_to_address(crypto, &header.next_consensus, address_version),
        "witnesses": [{
            "invocation": b64(&header.witness.invocation_script),
            "verification": b64(&header.witness.verification_script),
        }],
        "confirmations": confirmations,
        "nextblockhash": snapshot
            .block_hash(header.index + 1)
            .map(|h| Value::String(h.to_hex_string()))
            .unwrap_or(Value::Null),
    })
}

/// JSON form of a block: Base64 body or the verbose object with
/// transactions.
pub fn block_to_json(
    block: &Block,
    verbose: bool,
    crypto: &dyn Crypto,
    address_version: u8,
    snapshot: &dyn Snapshot,
) -> Value {
    if !verbose {
        return Value::String(b64(&block.to_array().unwrap_or_default()));
    }
    let mut value = header_to_json(&block.header, crypto, address_version, snapshot);
    value["size"] = json!(block.to_array().map(|b| b.len()).unwrap_or(0));
    value["tx"] = Value::Array(
        block
            .transactions
            .iter()
            .map(|tx| transaction_to_json(tx, true, crypto, address_version))
            .collect(),
    );
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use neoxide_vm::MapKey;

    #[test]
    fn test_primitive_rendering() {
        let rc = ReferenceCounter::new();
        assert_eq!(
            stack_item_to_json(&StackItem::from_int(-5), &rc),
            json!({"type": "Integer", "value": "-5"})
        );
        assert_eq!(
            stack_item_to_json(&StackItem::Boolean(true), &rc),
            json!({"type": "Boolean", "value": true})
        );
        assert_eq!(
            stack_item_to_json(&StackItem::from_bytes(vec![1, 2]), &rc),
            json!({"type": "ByteString", "value": b64(&[1, 2])})
        );
    }

    #[test]
    fn test_nested_compound_rendering() {
        let rc = ReferenceCounter::new();
        let inner = rc.new_struct(vec![StackItem::from_int(1)]);
        let map = rc.new_map(vec![(MapKey::ByteString(b"k".to_vec()), inner)]);
        let rendered = stack_item_to_json(&map, &rc);
        assert_eq!(rendered["type"], "Map");
        let value = &rendered["value"][&b64(b"k")];
        assert_eq!(value["type"], "Struct");
        assert_eq!(value["value"][0]["value"], "1");
    }

    #[test]
    fn test_cyclic_graph_degrades_gracefully() {
        let rc = ReferenceCounter::new();
        let array = rc.new_array(vec![]);
        let handle = array.compound_handle().unwrap();
        rc.seq_append(handle, array.clone()).unwrap();
        let rendered = stack_item_to_json(&array, &rc);
        assert_eq!(rendered["type"], "Array");
        assert_eq!(rendered["value"][0]["value"], Value::Null);
    }
}
