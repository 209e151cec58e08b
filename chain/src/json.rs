//! JSON vertex form.
//!
//! This is the representation served to API adapters and used by the
//! compact file storage: hashes as hex, scripts and witnesses as base64,
//! plus a best-effort `decoded` view of standard output scripts.
//! Serialize → parse → serialize is a fixed point modulo key order (the
//! `decoded` field is recomputed, never trusted).

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::script::standard::parse_standard;
use crate::types::vertex::{AuxPow, TokenInfo, TxInput, TxOutput, VertexKind, VertexVersion};
use crate::types::{Hash256, TokenUid, Vertex, VertexId};

/// Errors raised while reading the JSON vertex form.
#[derive(Debug, Eq, PartialEq)]
pub enum JsonError {
    /// A required field is missing or has the wrong JSON type.
    Field(&'static str),
    /// A hex or base64 payload failed to decode.
    Payload(&'static str),
    /// The version field names no known vertex kind.
    UnknownVersion(u64),
    /// The embedded hash does not match the reconstructed vertex.
    HashMismatch,
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Field(name) => write!(f, "missing or mistyped field: {name}"),
            JsonError::Payload(name) => write!(f, "undecodable payload in field: {name}"),
            JsonError::UnknownVersion(v) => write!(f, "unknown vertex version {v}"),
            JsonError::HashMismatch => write!(f, "hash does not match vertex contents"),
        }
    }
}

impl std::error::Error for JsonError {}

/// Renders a vertex into its JSON form.
///
/// The network version bytes are needed to express decoded output
/// addresses in base58.
pub fn vertex_to_json(vertex: &Vertex, p2pkh_version_byte: u8, multisig_version_byte: u8) -> Value {
    let inputs: Vec<Value> = vertex
        .inputs
        .iter()
        .map(|input| {
            json!({
                "tx_id": input.tx_id.to_string(),
                "index": input.index,
                "data": BASE64.encode(&input.script_sig),
            })
        })
        .collect();

    let outputs: Vec<Value> = vertex
        .outputs
        .iter()
        .map(|output| {
            let decoded = parse_standard(&output.script)
                .map(|s| {
                    let d = s.to_decoded(p2pkh_version_byte, multisig_version_byte);
                    json!({
                        "type": d.script_type,
                        "address": d.address,
                        "timelock": d.timelock,
                    })
                })
                .unwrap_or(Value::Null);
            json!({
                "value": output.value,
                "script": BASE64.encode(&output.script),
                "token_data": output.token_data,
                "decoded": decoded,
            })
        })
        .collect();

    let mut map = Map::new();
    map.insert("hash".into(), json!(vertex.hash.to_string()));
    map.insert("nonce".into(), json!(vertex.nonce.to_string()));
    map.insert("timestamp".into(), json!(vertex.timestamp));
    map.insert("version".into(), json!(vertex.version() as u16));
    map.insert("weight".into(), json!(vertex.weight));
    map.insert(
        "parents".into(),
        json!(vertex
            .parents
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()),
    );
    map.insert("inputs".into(), Value::Array(inputs));
    map.insert("outputs".into(), Value::Array(outputs));
    map.insert(
        "tokens".into(),
        json!(vertex
            .tokens
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()),
    );

    match &vertex.kind {
        VertexKind::Block { data, aux_pow } => {
            if !data.is_empty() {
                map.insert("data".into(), json!(BASE64.encode(data)));
            }
            if let Some(AuxPow(blob)) = aux_pow {
                map.insert("aux_pow".into(), json!(hex::encode(blob)));
            }
        }
        VertexKind::Transaction => {}
        VertexKind::TokenCreation { info } => {
            map.insert("token_name".into(), json!(info.name));
            map.insert("token_symbol".into(), json!(info.symbol));
        }
    }

    Value::Object(map)
}

fn str_field<'a>(value: &'a Value, name: &'static str) -> Result<&'a str, JsonError> {
    value
        .get(name)
        .and_then(Value::as_str)
        .ok_or(JsonError::Field(name))
}

fn u64_field(value: &Value, name: &'static str) -> Result<u64, JsonError> {
    value
        .get(name)
        .and_then(Value::as_u64)
        .ok_or(JsonError::Field(name))
}

fn hash_field(value: &Value, name: &'static str) -> Result<Hash256, JsonError> {
    Hash256::from_hex(str_field(value, name)?).ok_or(JsonError::Payload(name))
}

/// Reconstructs a vertex from its JSON form, verifying the embedded hash.
pub fn vertex_from_json(value: &Value) -> Result<Vertex, JsonError> {
    let hash = VertexId(hash_field(value, "hash")?);
    let nonce: u128 = str_field(value, "nonce")?
        .parse()
        .map_err(|_| JsonError::Payload("nonce"))?;
    let timestamp = u64_field(value, "timestamp")?;
    let version = u64_field(value, "version")?;
    let version =
        VertexVersion::from_u16(version as u16).ok_or(JsonError::UnknownVersion(version))?;
    let weight = value
        .get("weight")
        .and_then(Value::as_f64)
        .ok_or(JsonError::Field("weight"))?;

    let parents = value
        .get("parents")
        .and_then(Value::as_array)
        .ok_or(JsonError::Field("parents"))?
        .iter()
        .map(|p| {
            p.as_str()
                .and_then(Hash256::from_hex)
                .map(VertexId)
                .ok_or(JsonError::Payload("parents"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let inputs = value
        .get("inputs")
        .and_then(Value::as_array)
        .ok_or(JsonError::Field("inputs"))?
        .iter()
        .map(|input| {
            let tx_id = VertexId(hash_field(input, "tx_id")?);
            let index = u64_field(input, "index")? as u8;
            let data = BASE64
                .decode(str_field(input, "data")?)
                .map_err(|_| JsonError::Payload("inputs.data"))?;
            Ok(TxInput::new(tx_id, index, data))
        })
        .collect::<Result<Vec<_>, JsonError>>()?;

    let outputs = value
        .get("outputs")
        .and_then(Value::as_array)
        .ok_or(JsonError::Field("outputs"))?
        .iter()
        .map(|output| {
            let value_field = u64_field(output, "value")?;
            let script = BASE64
                .decode(str_field(output, "script")?)
                .map_err(|_| JsonError::Payload("outputs.script"))?;
            let token_data = u64_field(output, "token_data")? as u8;
            Ok(TxOutput::with_token_data(value_field, script, token_data))
        })
        .collect::<Result<Vec<_>, JsonError>>()?;

    let tokens = value
        .get("tokens")
        .and_then(Value::as_array)
        .ok_or(JsonError::Field("tokens"))?
        .iter()
        .map(|t| {
            t.as_str()
                .and_then(Hash256::from_hex)
                .map(TokenUid)
                .ok_or(JsonError::Payload("tokens"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let kind = match version {
        VertexVersion::RegularBlock | VertexVersion::MergeMinedBlock => {
            let data = match value.get("data").and_then(Value::as_str) {
                Some(b64) => BASE64.decode(b64).map_err(|_| JsonError::Payload("data"))?,
                None => Vec::new(),
            };
            let aux_pow = match version {
                VertexVersion::MergeMinedBlock => {
                    let blob = hex::decode(str_field(value, "aux_pow")?)
                        .map_err(|_| JsonError::Payload("aux_pow"))?;
                    Some(AuxPow(blob))
                }
                _ => None,
            };
            VertexKind::Block { data, aux_pow }
        }
        VertexVersion::RegularTx => VertexKind::Transaction,
        VertexVersion::TokenCreationTx => VertexKind::TokenCreation {
            info: TokenInfo {
                name: str_field(value, "token_name")?.to_string(),
                symbol: str_field(value, "token_symbol")?.to_string(),
            },
        },
    };

    let mut vertex = Vertex {
        hash: VertexId(Hash256::ZERO),
        nonce,
        timestamp,
        weight,
        parents,
        inputs,
        outputs,
        tokens,
        kind,
    };
    vertex.update_hash();
    if vertex.hash != hash {
        return Err(JsonError::HashMismatch);
    }
    Ok(vertex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;
    use crate::script::standard::P2pkh;
    use crate::types::HASH_LEN;

    fn sample_tx() -> Vertex {
        let addr = Address::from_pubkey(0x28, b"a test public key");
        let mut v = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0xfeed,
            timestamp: 1_600_000_555,
            weight: 18.25,
            parents: vec![
                VertexId(Hash256([1; HASH_LEN])),
                VertexId(Hash256([2; HASH_LEN])),
            ],
            inputs: vec![TxInput::new(
                VertexId(Hash256([3; HASH_LEN])),
                1,
                vec![0xde, 0xad],
            )],
            outputs: vec![TxOutput::new(
                4200,
                P2pkh::create_output_script(&addr, Some(1_700_000_000)),
            )],
            tokens: vec![TokenUid(Hash256([4; HASH_LEN]))],
            kind: VertexKind::Transaction,
        };
        v.update_hash();
        v
    }

    #[test]
    fn json_roundtrip_is_fixed_point() {
        let v = sample_tx();
        let encoded = vertex_to_json(&v, 0x28, 0x64);
        let back = vertex_from_json(&encoded).expect("parse");
        assert_eq!(v, back);
        assert_eq!(encoded, vertex_to_json(&back, 0x28, 0x64));
    }

    #[test]
    fn decoded_output_describes_p2pkh() {
        let v = sample_tx();
        let encoded = vertex_to_json(&v, 0x28, 0x64);
        let decoded = &encoded["outputs"][0]["decoded"];
        assert_eq!(decoded["type"], "P2PKH");
        assert_eq!(decoded["timelock"], 1_700_000_000u32);
        assert!(decoded["address"].as_str().is_some());
    }

    #[test]
    fn block_json_carries_data_and_aux_pow() {
        let mut v = sample_tx();
        v.inputs.clear();
        v.tokens.clear();
        v.parents.push(VertexId(Hash256([5; HASH_LEN])));
        v.kind = VertexKind::Block {
            data: b"block data".to_vec(),
            aux_pow: Some(AuxPow(vec![9, 9, 9])),
        };
        v.update_hash();

        let encoded = vertex_to_json(&v, 0x28, 0x64);
        assert_eq!(encoded["version"], VertexVersion::MergeMinedBlock as u16);
        assert_eq!(encoded["aux_pow"], hex::encode([9, 9, 9]));
        let back = vertex_from_json(&encoded).expect("parse");
        assert_eq!(v, back);
    }

    #[test]
    fn tampered_hash_is_rejected() {
        let v = sample_tx();
        let mut encoded = vertex_to_json(&v, 0x28, 0x64);
        encoded["timestamp"] = json!(v.timestamp + 1);
        assert_eq!(vertex_from_json(&encoded), Err(JsonError::HashMismatch));
    }
}
