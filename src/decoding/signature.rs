//! Human-readable ABI signature parsing for events and functions.
//!
//! Accepts signatures like `Transfer(address indexed from, address indexed
//! to, uint256 value)` and named tuples like
//! `Swap((address currency0, address currency1) key, uint256 amount)`.

use alloy::dyn_abi::DynSolType;
use alloy::primitives::{keccak256, B256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature: {0}")]
    Invalid(String),
    #[error("failed to parse type '{0}': {1}")]
    TypeParse(String, String),
    #[error("missing closing parenthesis")]
    MissingCloseParen,
    #[error("invalid tuple format: {0}")]
    InvalidTuple(String),
    #[error("empty tuple field")]
    EmptyField,
}

/// Field names within a tuple parameter, preserving nesting.
#[derive(Debug, Clone)]
pub enum TupleFields {
    Leaf,
    Tuple(Vec<(String, TupleFields)>),
}

#[derive(Debug, Clone)]
pub struct AbiParam {
    pub name: String,
    pub param_type: DynSolType,
    pub type_string: String,
    pub indexed: bool,
    pub tuple_fields: Option<TupleFields>,
}

#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub name: String,
    pub signature: String,
    pub canonical_signature: String,
    pub topic0: B256,
    pub params: Vec<AbiParam>,
}

#[derive(Debug, Clone)]
pub struct ParsedFunction {
    pub name: String,
    pub signature: String,
    pub canonical_signature: String,
    pub selector: [u8; 4],
    pub params: Vec<AbiParam>,
}

fn parse_signature(signature: &str) -> Result<(String, String, Vec<AbiParam>), SignatureError> {
    let signature = signature.trim();

    let open_paren = signature
        .find('(')
        .ok_or_else(|| SignatureError::Invalid(signature.to_string()))?;

    let name = signature[..open_paren].trim().to_string();
    if name.is_empty() {
        return Err(SignatureError::Invalid("empty name".to_string()));
    }

    let close_paren = find_matching_close_paren(signature, open_paren)
        .ok_or(SignatureError::MissingCloseParen)?;

    let params = parse_params(&signature[open_paren + 1..close_paren])?;

    let type_strings: Vec<&str> = params.iter().map(|p| p.type_string.as_str()).collect();
    let canonical = format!("{}({})", name, type_strings.join(","));

    Ok((name, canonical, params))
}

impl ParsedEvent {
    pub fn from_signature(signature: &str) -> Result<Self, SignatureError> {
        let (name, canonical_signature, params) = parse_signature(signature)?;
        let topic0 = keccak256(canonical_signature.as_bytes());
        Ok(Self {
            name,
            signature: signature.trim().to_string(),
            canonical_signature,
            topic0,
            params,
        })
    }

    pub fn indexed_params(&self) -> impl Iterator<Item = &AbiParam> {
        self.params.iter().filter(|p| p.indexed)
    }

    pub fn data_params(&self) -> impl Iterator<Item = &AbiParam> {
        self.params.iter().filter(|p| !p.indexed)
    }
}

impl ParsedFunction {
    pub fn from_signature(signature: &str) -> Result<Self, SignatureError> {
        let (name, canonical_signature, params) = parse_signature(signature)?;
        let hash = keccak256(canonical_signature.as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        Ok(Self {
            name,
            signature: signature.trim().to_string(),
            canonical_signature,
            selector,
            params,
        })
    }
}

fn find_matching_close_paren(s: &str, open_pos: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in s[open_pos..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_pos + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a parameter list on top-level commas (tuple-aware) and parse each.
fn parse_params(params_str: &str) -> Result<Vec<AbiParam>, SignatureError> {
    let params_str = params_str.trim();
    if params_str.is_empty() {
        return Ok(Vec::new());
    }

    let mut params = Vec::new();
    let mut current = String::new();
    let mut depth = 0;

    for c in params_str.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    params.push(parse_single_param(current.trim())?);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        params.push(parse_single_param(current.trim())?);
    }

    Ok(params)
}

fn parse_single_param(param_str: &str) -> Result<AbiParam, SignatureError> {
    if param_str.starts_with('(') {
        return parse_tuple_param(param_str);
    }

    let parts: Vec<&str> = param_str.split_whitespace().collect();
    let (type_string, indexed, name) = match parts.as_slice() {
        [ty] => (ty.to_string(), false, String::new()),
        [ty, "indexed"] => (ty.to_string(), true, String::new()),
        [ty, name] => (ty.to_string(), false, name.to_string()),
        [ty, "indexed", name] => (ty.to_string(), true, name.to_string()),
        _ => {
            return Err(SignatureError::Invalid(format!(
                "bad parameter '{param_str}'"
            )))
        }
    };

    let param_type = DynSolType::parse(&type_string)
        .map_err(|e| SignatureError::TypeParse(type_string.clone(), e.to_string()))?;

    Ok(AbiParam {
        name,
        param_type,
        type_string,
        indexed,
        tuple_fields: None,
    })
}

fn parse_tuple_param(param_str: &str) -> Result<AbiParam, SignatureError> {
    let close_idx = find_matching_close_paren(param_str, 0)
        .ok_or_else(|| SignatureError::InvalidTuple(param_str.to_string()))?;

    let tuple_content = &param_str[1..close_idx];
    let after = param_str[close_idx + 1..].trim();

    let (indexed, name) = match after.split_whitespace().collect::<Vec<_>>().as_slice() {
        [] => (false, String::new()),
        ["indexed"] => (true, String::new()),
        ["indexed", name, ..] => (true, name.to_string()),
        [name, ..] => (false, name.to_string()),
    };

    let (fields, canonical_types) = parse_tuple_fields(tuple_content)?;
    let type_string = format!("({})", canonical_types.join(","));
    let param_type = DynSolType::parse(&type_string)
        .map_err(|e| SignatureError::TypeParse(type_string.clone(), e.to_string()))?;

    Ok(AbiParam {
        name,
        param_type,
        type_string,
        indexed,
        tuple_fields: Some(TupleFields::Tuple(fields)),
    })
}

fn parse_tuple_fields(
    content: &str,
) -> Result<(Vec<(String, TupleFields)>, Vec<String>), SignatureError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SignatureError::InvalidTuple("empty tuple".to_string()));
    }

    let mut fields = Vec::new();
    let mut canonical_types = Vec::new();

    for field in split_top_level(content) {
        let field = field.trim();
        if field.is_empty() {
            return Err(SignatureError::EmptyField);
        }

        if field.starts_with('(') {
            let close_idx = find_matching_close_paren(field, 0)
                .ok_or_else(|| SignatureError::InvalidTuple(field.to_string()))?;
            let nested = &field[1..close_idx];
            let name = field[close_idx + 1..]
                .split_whitespace()
                .last()
                .ok_or_else(|| {
                    SignatureError::InvalidTuple(format!("tuple field '{field}' has no name"))
                })?
                .to_string();
            let (nested_fields, nested_types) = parse_tuple_fields(nested)?;
            canonical_types.push(format!("({})", nested_types.join(",")));
            fields.push((name, TupleFields::Tuple(nested_fields)));
        } else {
            let mut parts = field.splitn(2, ' ');
            let type_str = parts.next().unwrap_or_default().trim();
            let name = parts.next().unwrap_or_default().trim().to_string();
            if name.is_empty() {
                return Err(SignatureError::InvalidTuple(format!(
                    "field '{field}' must have a name in a named tuple"
                )));
            }
            DynSolType::parse(type_str)
                .map_err(|e| SignatureError::TypeParse(type_str.to_string(), e.to_string()))?;
            canonical_types.push(type_str.to_string());
            fields.push((name, TupleFields::Leaf));
        }
    }

    Ok((fields, canonical_types))
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                fields.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&s[start..]);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transfer_event() {
        let parsed = ParsedEvent::from_signature(
            "Transfer(address indexed from, address indexed to, uint256 value)",
        )
        .unwrap();

        assert_eq!(parsed.name, "Transfer");
        assert_eq!(parsed.canonical_signature, "Transfer(address,address,uint256)");
        assert_eq!(parsed.params.len(), 3);
        assert_eq!(parsed.indexed_params().count(), 2);
        assert_eq!(parsed.data_params().count(), 1);
        assert_eq!(parsed.params[2].name, "value");
    }

    #[test]
    fn topic0_matches_known_transfer_hash() {
        let parsed = ParsedEvent::from_signature(
            "Transfer(address indexed from, address indexed to, uint256 value)",
        )
        .unwrap();
        let expected =
            hex::decode("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
                .unwrap();
        assert_eq!(parsed.topic0.as_slice(), expected.as_slice());
    }

    #[test]
    fn parses_named_tuple_param() {
        let parsed = ParsedEvent::from_signature(
            "Initialize((address currency0, address currency1, uint24 fee) key, uint160 price)",
        )
        .unwrap();
        assert_eq!(
            parsed.canonical_signature,
            "Initialize((address,address,uint24),uint160)"
        );
        match &parsed.params[0].tuple_fields {
            Some(TupleFields::Tuple(fields)) => {
                let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["currency0", "currency1", "fee"]);
            }
            other => panic!("expected tuple fields, got {other:?}"),
        }
    }

    #[test]
    fn parses_empty_param_list() {
        let parsed = ParsedEvent::from_signature("Paused()").unwrap();
        assert_eq!(parsed.params.len(), 0);
        assert_eq!(parsed.canonical_signature, "Paused()");
    }

    #[test]
    fn function_selector_matches_known_transfer_selector() {
        let parsed =
            ParsedFunction::from_signature("transfer(address to, uint256 value)").unwrap();
        assert_eq!(parsed.canonical_signature, "transfer(address,uint256)");
        // Known selector of transfer(address,uint256).
        assert_eq!(parsed.selector, [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert!(ParsedEvent::from_signature("NoParens").is_err());
        assert!(ParsedEvent::from_signature("(address)").is_err());
        assert!(ParsedEvent::from_signature("Bad(address indexed to extra word)").is_err());
        assert!(ParsedEvent::from_signature("Bad(notatype x)").is_err());
    }
}
