//! ABI decoding of event logs and function inputs into named, JSON-safe
//! values.
//!
//! Failures never escape as errors: every decode path degrades to
//! `DecodedData::Undecodable` so one bad record cannot stall a cycle.

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::hex;
use alloy::primitives::B256;

use crate::types::decoded::{DecodedData, DecodedParam};
use crate::types::log::Log;

use super::signature::{AbiParam, ParsedEvent, ParsedFunction, TupleFields};

/// Decode a log's topics and data against a parsed event signature.
/// Indexed parameters come from topics 1..; the remaining parameters are
/// ABI-decoded from the data section. Output preserves declaration order.
pub fn decode_log(event: &ParsedEvent, log: &Log) -> DecodedData {
    match try_decode_log(event, log) {
        Ok(params) => DecodedData::Decoded { params },
        Err(reason) => DecodedData::Undecodable { reason },
    }
}

fn try_decode_log(event: &ParsedEvent, log: &Log) -> Result<Vec<DecodedParam>, String> {
    let topic0 = log.topic0().ok_or_else(|| "log has no topics".to_string())?;
    if topic0 != event.topic0 {
        return Err(format!(
            "topic0 {topic0} does not match event {}",
            event.canonical_signature
        ));
    }

    let indexed: Vec<&AbiParam> = event.indexed_params().collect();
    if log.topics.len() != indexed.len() + 1 {
        return Err(format!(
            "expected {} topics for {}, log has {}",
            indexed.len() + 1,
            event.canonical_signature,
            log.topics.len()
        ));
    }

    let mut indexed_values = Vec::with_capacity(indexed.len());
    for (param, topic) in indexed.iter().zip(log.topics.iter().skip(1)) {
        indexed_values.push(decode_indexed_param(param, topic)?);
    }

    let data_types: Vec<DynSolType> =
        event.data_params().map(|p| p.param_type.clone()).collect();
    let mut data_values = if data_types.is_empty() {
        Vec::new()
    } else {
        let decoded = DynSolType::Tuple(data_types)
            .abi_decode(&log.data)
            .map_err(|e| format!("data decode failed: {e}"))?;
        match decoded {
            DynSolValue::Tuple(values) => values,
            single => vec![single],
        }
    };

    if data_values.len() != event.data_params().count() {
        return Err("data arity mismatch".to_string());
    }

    // Re-interleave in declaration order.
    let mut indexed_iter = indexed_values.into_iter();
    let mut data_iter = data_values.drain(..);
    let mut params = Vec::with_capacity(event.params.len());
    for (position, param) in event.params.iter().enumerate() {
        let value = if param.indexed {
            indexed_iter.next()
        } else {
            data_iter.next().map(|v| value_to_json(&v, param.tuple_fields.as_ref()))
        }
        .ok_or_else(|| "parameter arity mismatch".to_string())?;
        params.push(DecodedParam {
            name: param_name(param, position),
            type_string: param.type_string.clone(),
            value,
        });
    }
    Ok(params)
}

fn decode_indexed_param(param: &AbiParam, topic: &B256) -> Result<serde_json::Value, String> {
    // Dynamic indexed values (strings, bytes, arrays, tuples) are stored on
    // chain as their keccak hash; surface the hash rather than pretending to
    // decode it.
    if is_dynamic(&param.param_type) {
        return Ok(serde_json::Value::String(hex::encode_prefixed(topic)));
    }
    let value = param
        .param_type
        .abi_decode(topic.as_slice())
        .map_err(|e| format!("indexed decode failed for '{}': {e}", param.type_string))?;
    Ok(value_to_json(&value, None))
}

fn is_dynamic(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(_, _)
            | DynSolType::Tuple(_)
    )
}

/// Decode a transaction input against a parsed function signature.
/// The four-byte selector must match; the rest is the encoded argument list.
pub fn decode_function_input(function: &ParsedFunction, input: &[u8]) -> DecodedData {
    match try_decode_function_input(function, input) {
        Ok(params) => DecodedData::Decoded { params },
        Err(reason) => DecodedData::Undecodable { reason },
    }
}

fn try_decode_function_input(
    function: &ParsedFunction,
    input: &[u8],
) -> Result<Vec<DecodedParam>, String> {
    if input.len() < 4 {
        return Err("input shorter than a selector".to_string());
    }
    if input[..4] != function.selector {
        return Err(format!(
            "selector 0x{} does not match {}",
            hex::encode(&input[..4]),
            function.canonical_signature
        ));
    }

    let types: Vec<DynSolType> = function.params.iter().map(|p| p.param_type.clone()).collect();
    let values = if types.is_empty() {
        Vec::new()
    } else {
        let decoded = DynSolType::Tuple(types)
            .abi_decode(&input[4..])
            .map_err(|e| format!("input decode failed: {e}"))?;
        match decoded {
            DynSolValue::Tuple(values) => values,
            single => vec![single],
        }
    };

    if values.len() != function.params.len() {
        return Err("argument arity mismatch".to_string());
    }

    Ok(function
        .params
        .iter()
        .enumerate()
        .zip(values)
        .map(|((position, param), value)| DecodedParam {
            name: param_name(param, position),
            type_string: param.type_string.clone(),
            value: value_to_json(&value, param.tuple_fields.as_ref()),
        })
        .collect())
}

fn param_name(param: &AbiParam, position: usize) -> String {
    if param.name.is_empty() {
        format!("param_{position}")
    } else {
        param.name.clone()
    }
}

/// Convert a decoded value to its JSON-safe form: byte values become
/// `0x`-hex strings, numbers become decimal strings (they routinely exceed
/// 64 bits), tuples become ordered name/type/value records.
pub fn value_to_json(value: &DynSolValue, fields: Option<&TupleFields>) -> serde_json::Value {
    match value {
        DynSolValue::Address(a) => serde_json::Value::String(hex::encode_prefixed(a)),
        DynSolValue::Bool(b) => serde_json::Value::Bool(*b),
        DynSolValue::Uint(v, _) => serde_json::Value::String(v.to_string()),
        DynSolValue::Int(v, _) => serde_json::Value::String(v.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            serde_json::Value::String(hex::encode_prefixed(&word[..*size]))
        }
        DynSolValue::Bytes(bytes) => serde_json::Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => serde_json::Value::String(s.replace('\u{0000}', "")),
        DynSolValue::Tuple(values) => {
            let names: Vec<Option<&str>> = match fields {
                Some(TupleFields::Tuple(fields)) => {
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, _)| fields.get(i).map(|(name, _)| name.as_str()))
                        .collect()
                }
                _ => vec![None; values.len()],
            };
            let entries: Vec<serde_json::Value> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let nested = match fields {
                        Some(TupleFields::Tuple(fields)) => fields.get(i).map(|(_, f)| f),
                        _ => None,
                    };
                    serde_json::json!({
                        "name": names[i].map(str::to_string).unwrap_or_else(|| format!("param_{i}")),
                        "type": sol_type_name(v),
                        "value": value_to_json(v, nested),
                    })
                })
                .collect();
            serde_json::Value::Array(entries)
        }
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => serde_json::Value::Array(
            values.iter().map(|v| value_to_json(v, None)).collect(),
        ),
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

fn sol_type_name(value: &DynSolValue) -> String {
    value
        .sol_type_name()
        .map(|name| name.into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256};

    fn topic_address(addr: Address) -> B256 {
        B256::left_padding_from(addr.as_slice())
    }

    fn transfer_event() -> ParsedEvent {
        ParsedEvent::from_signature(
            "Transfer(address indexed from, address indexed to, uint256 value)",
        )
        .unwrap()
    }

    fn log_with(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            address: Address::repeat_byte(0x42),
            topics,
            data: Bytes::from(data),
            log_index: 0,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
            block_number: 1,
            block_hash: B256::ZERO,
            block_timestamp: 0,
            reorg: false,
        }
    }

    #[test]
    fn decodes_erc20_transfer_log() {
        let event = transfer_event();
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let value = B256::from(U256::from(1_000u64));
        let log = log_with(
            vec![event.topic0, topic_address(from), topic_address(to)],
            value.to_vec(),
        );

        match decode_log(&event, &log) {
            DecodedData::Decoded { params } => {
                assert_eq!(params.len(), 3);
                assert_eq!(params[0].name, "from");
                assert_eq!(
                    params[0].value,
                    serde_json::Value::String(format!("0x{}", "11".repeat(20)))
                );
                assert_eq!(params[2].name, "value");
                assert_eq!(params[2].value, serde_json::Value::String("1000".to_string()));
            }
            other => panic!("expected decoded params, got {other:?}"),
        }
    }

    #[test]
    fn truncated_data_degrades_to_undecodable() {
        let event = transfer_event();
        let log = log_with(
            vec![
                event.topic0,
                topic_address(Address::ZERO),
                topic_address(Address::ZERO),
            ],
            vec![0x01, 0x02],
        );
        assert!(matches!(
            decode_log(&event, &log),
            DecodedData::Undecodable { .. }
        ));
    }

    #[test]
    fn topic_count_mismatch_degrades_to_undecodable() {
        let event = transfer_event();
        let log = log_with(vec![event.topic0], Vec::new());
        assert!(matches!(
            decode_log(&event, &log),
            DecodedData::Undecodable { .. }
        ));
    }

    #[test]
    fn decodes_function_input_with_selector_check() {
        let function =
            ParsedFunction::from_signature("transfer(address to, uint256 value)").unwrap();
        let mut input = function.selector.to_vec();
        input.extend_from_slice(topic_address(Address::repeat_byte(0x33)).as_slice());
        input.extend_from_slice(B256::from(U256::from(7u64)).as_slice());

        match decode_function_input(&function, &input) {
            DecodedData::Decoded { params } => {
                assert_eq!(params[0].name, "to");
                assert_eq!(params[1].value, serde_json::Value::String("7".to_string()));
            }
            other => panic!("expected decoded params, got {other:?}"),
        }

        let wrong_selector = [0u8; 8];
        assert!(matches!(
            decode_function_input(&function, &wrong_selector),
            DecodedData::Undecodable { .. }
        ));
    }

    #[test]
    fn tuple_values_become_named_entries() {
        let event = ParsedEvent::from_signature(
            "PoolCreated((address token0, address token1) pair, uint256 fee)",
        )
        .unwrap();
        let tuple = DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::repeat_byte(1)),
            DynSolValue::Address(Address::repeat_byte(2)),
        ]);
        let json = value_to_json(&tuple, event.params[0].tuple_fields.as_ref());
        let entries = json.as_array().unwrap();
        assert_eq!(entries[0]["name"], "token0");
        assert_eq!(entries[1]["name"], "token1");
        assert_eq!(entries[0]["type"], "address");
    }
}
