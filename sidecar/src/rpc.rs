use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SidecarError};

/// One normalized JSON-RPC invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    pub id: Value,
    pub params: Vec<Value>,
}

/// Coerces a JSON body into an ordered sequence of validated call
/// descriptors. A non-array body is treated as a one-element batch. The
/// sequence order is the response order for batch dispatch.
pub fn normalize_calls(body: &Value) -> Result<Vec<RpcCall>> {
    match body {
        Value::Array(items) => items.iter().map(normalize_one).collect(),
        other => Ok(vec![normalize_one(other)?]),
    }
}

fn normalize_one(element: &Value) -> Result<RpcCall> {
    let method = match element.get("method") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(SidecarError::MissingMethod),
    };

    let id = match element.get("id") {
        Some(id) if !is_falsy(id) => id.clone(),
        _ => return Err(SidecarError::MissingId),
    };

    // A missing params list is synthesized as empty, never rejected.
    let params = match element.get("params") {
        Some(Value::Array(params)) => params.clone(),
        Some(v) if is_falsy(v) => Vec::new(),
        None => Vec::new(),
        Some(_) => return Err(SidecarError::InvalidParams),
    };

    Ok(RpcCall { method, id, params })
}

/// JavaScript falsiness for JSON values: null, false, 0, and "".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_object_becomes_one_element_sequence() {
        let calls = normalize_calls(&json!({
            "method": "eth_blockNumber",
            "id": 1,
        }))
        .unwrap();
        assert_eq!(
            calls,
            vec![RpcCall {
                method: "eth_blockNumber".into(),
                id: json!(1),
                params: vec![],
            }]
        );
    }

    #[test]
    fn existing_params_are_preserved() {
        let calls = normalize_calls(&json!({
            "method": "eth_getBalance",
            "id": "a",
            "params": ["0xabc", "latest"],
        }))
        .unwrap();
        assert_eq!(calls[0].params, vec![json!("0xabc"), json!("latest")]);
    }

    #[test]
    fn null_params_are_replaced_with_empty() {
        let calls = normalize_calls(&json!({
            "method": "eth_blockNumber",
            "id": 1,
            "params": null,
        }))
        .unwrap();
        assert!(calls[0].params.is_empty());
    }

    #[test]
    fn missing_method_is_rejected() {
        let err = normalize_calls(&json!({"id": 1})).unwrap_err();
        assert_eq!(err.to_string(), "No method specified");
    }

    #[test]
    fn falsy_method_is_rejected() {
        for body in [
            json!({"method": "", "id": 1}),
            json!({"method": null, "id": 1}),
        ] {
            assert!(matches!(
                normalize_calls(&body),
                Err(SidecarError::MissingMethod)
            ));
        }
    }

    #[test]
    fn missing_or_falsy_id_is_rejected() {
        for body in [
            json!({"method": "eth_blockNumber"}),
            json!({"method": "eth_blockNumber", "id": 0}),
            json!({"method": "eth_blockNumber", "id": null}),
            json!({"method": "eth_blockNumber", "id": ""}),
        ] {
            let err = normalize_calls(&body).unwrap_err();
            assert_eq!(err.to_string(), "No id specified");
        }
    }

    #[test]
    fn array_body_preserves_order() {
        let calls = normalize_calls(&json!([
            {"method": "eth_blockNumber", "id": 2},
            {"method": "eth_chainId", "id": 1},
        ]))
        .unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, "eth_blockNumber");
        assert_eq!(calls[0].id, json!(2));
        assert_eq!(calls[1].method, "eth_chainId");
        assert_eq!(calls[1].id, json!(1));
    }

    #[test]
    fn array_applies_per_element_validation() {
        let err = normalize_calls(&json!([
            {"method": "eth_blockNumber", "id": 1},
            {"id": 2},
        ]))
        .unwrap_err();
        assert!(matches!(err, SidecarError::MissingMethod));
    }

    #[test]
    fn empty_array_normalizes_to_empty_sequence() {
        assert!(normalize_calls(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn non_array_params_are_rejected() {
        let err = normalize_calls(&json!({
            "method": "eth_call",
            "id": 1,
            "params": {"to": "0xabc"},
        }))
        .unwrap_err();
        assert!(matches!(err, SidecarError::InvalidParams));
    }
}
