//! Minimal JSON-RPC frames for EVM log sources.

use crate::FeedError;
use poolwatch_core::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

impl RpcRequest {
    fn new(id: u64, method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    /// eth_subscribe to logs matching any of the given topic0 values.
    pub fn subscribe_logs(id: u64, topic0: &[&str]) -> Self {
        Self::new(
            id,
            "eth_subscribe",
            json!(["logs", { "topics": [topic0] }]),
        )
    }

    /// eth_subscribe to new block headers, used for head tracking.
    pub fn subscribe_new_heads(id: u64) -> Self {
        Self::new(id, "eth_subscribe", json!(["newHeads"]))
    }

    pub fn block_number(id: u64) -> Self {
        Self::new(id, "eth_blockNumber", json!([]))
    }

    /// eth_getLogs over an inclusive block range, optionally filtered by
    /// emitting contract addresses.
    pub fn get_logs(id: u64, from: u64, to: u64, addresses: &[Address], topic0: &[&str]) -> Self {
        let mut filter = json!({
            "fromBlock": to_hex(from),
            "toBlock": to_hex(to),
            "topics": [topic0],
        });
        if !addresses.is_empty() {
            let list: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
            filter["address"] = json!(list);
        }
        Self::new(id, "eth_getLogs", json!([filter]))
    }
}

/// Incoming JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    /// Unwrap the result or convert the RPC error body.
    pub fn into_result(self) -> Result<Value, FeedError> {
        if let Some(err) = self.error {
            return Err(FeedError::RpcError {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| FeedError::ParseError("response missing result".into()))
    }
}

/// Push notification frame for an active subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionFrame {
    pub method: Option<String>,
    pub params: Option<SubscriptionParams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: Value,
}

/// One raw log entry as delivered by eth_getLogs / eth_subscribe.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
    /// Set by some nodes when a log was removed in a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl LogEntry {
    pub fn block(&self) -> Result<u64, FeedError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn index(&self) -> Result<u32, FeedError> {
        parse_hex_u64(&self.log_index).map(|v| v as u32)
    }
}

/// New block header notification; only the number is used.
#[derive(Debug, Clone, Deserialize)]
pub struct HeadFrame {
    pub number: String,
}

impl HeadFrame {
    pub fn block(&self) -> Result<u64, FeedError> {
        parse_hex_u64(&self.number)
    }
}

pub fn to_hex(v: u64) -> String {
    format!("0x{:x}", v)
}

/// Parse a 0x-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, FeedError> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| FeedError::ParseError(format!("missing 0x prefix: {}", s)))?;
    u64::from_str_radix(hex, 16)
        .map_err(|e| FeedError::ParseError(format!("bad hex quantity {}: {}", s, e)))
}

/// Borrow the i-th 32-byte word of an ABI data blob (without 0x prefix).
pub fn data_word(data: &str, index: usize) -> Option<&str> {
    let hex = data.strip_prefix("0x").unwrap_or(data);
    let start = index * 64;
    let end = start + 64;
    if hex.len() < end {
        return None;
    }
    Some(&hex[start..end])
}

/// Parse a 32-byte word as an unsigned amount. Values above u128 saturate;
/// token amounts that large are beyond any meaningful USD estimate anyway.
pub fn word_u128(word: &str) -> u128 {
    let (high, low) = word.split_at(32);
    if high.bytes().any(|b| b != b'0') {
        return u128::MAX;
    }
    u128::from_str_radix(low, 16).unwrap_or(u128::MAX)
}

/// Parse a 32-byte word as a signed int256 magnitude.
/// Returns (magnitude, is_negative); magnitudes above u128 saturate.
pub fn word_i128_magnitude(word: &str) -> (u128, bool) {
    let negative = matches!(word.as_bytes().first(), Some(b'8'..=b'9' | b'a'..=b'f' | b'A'..=b'F'));
    if !negative {
        return (word_u128(word), false);
    }
    let (high, low) = word.split_at(32);
    // Two's complement: magnitude fits u128 only when the high bits are all 1s
    if high.bytes().any(|b| !matches!(b, b'f' | b'F')) {
        return (u128::MAX, true);
    }
    let low_val = u128::from_str_radix(low, 16).unwrap_or(0);
    if low_val == 0 {
        // Exactly -2^128; the magnitude does not fit u128.
        return (u128::MAX, true);
    }
    ((!low_val).wrapping_add(1), true)
}

/// Parse the address packed into the low 20 bytes of a 32-byte word.
pub fn word_address(word: &str) -> Result<Address, FeedError> {
    if word.len() != 64 {
        return Err(FeedError::ParseError(format!("bad word length: {}", word.len())));
    }
    let tail = &word[24..];
    format!("0x{}", tail)
        .parse()
        .map_err(|e| FeedError::ParseError(format!("bad address word: {}", e)))
}

/// Parse an address from a 32-byte topic (0x + 64 hex chars).
pub fn topic_address(topic: &str) -> Result<Address, FeedError> {
    let hex = topic
        .strip_prefix("0x")
        .ok_or_else(|| FeedError::ParseError(format!("missing 0x prefix: {}", topic)))?;
    word_address(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x1a4").unwrap(), 420);
        assert!(parse_hex_u64("1a4").is_err());
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_data_word_extraction() {
        let data = format!("0x{}{}", "1".repeat(64), "2".repeat(64));
        assert_eq!(data_word(&data, 0).unwrap(), "1".repeat(64));
        assert_eq!(data_word(&data, 1).unwrap(), "2".repeat(64));
        assert!(data_word(&data, 2).is_none());
    }

    #[test]
    fn test_word_u128() {
        let mut word = "0".repeat(64);
        word.replace_range(62..64, "ff");
        assert_eq!(word_u128(&word), 255);

        // High bits set saturate
        let big = "f".repeat(64);
        assert_eq!(word_u128(&big), u128::MAX);
    }

    #[test]
    fn test_word_i128_magnitude() {
        let mut positive = "0".repeat(64);
        positive.replace_range(62..64, "64");
        assert_eq!(word_i128_magnitude(&positive), (100, false));

        // -100 as int256 two's complement
        let negative = format!("{}{}", "f".repeat(32), "ffffffffffffffffffffffffffffff9c");
        assert_eq!(word_i128_magnitude(&negative), (100, true));
    }

    #[test]
    fn test_word_address() {
        let word = format!("{}{}", "0".repeat(24), "4200000000000000000000000000000000000006");
        let addr = word_address(&word).unwrap();
        assert_eq!(addr.to_string(), "0x4200000000000000000000000000000000000006");
    }

    #[test]
    fn test_get_logs_request_shape() {
        let addr: Address = "0x8909dc15e40173ff4699343b6eb8132c65e18ec6".parse().unwrap();
        let req = RpcRequest::get_logs(7, 100, 200, &[addr], &["0xabc"]);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["method"], "eth_getLogs");
        assert_eq!(json["params"][0]["fromBlock"], "0x64");
        assert_eq!(json["params"][0]["toBlock"], "0xc8");
        assert_eq!(
            json["params"][0]["address"][0],
            "0x8909dc15e40173ff4699343b6eb8132c65e18ec6"
        );
    }

    #[test]
    fn test_log_entry_parse() {
        let raw = r#"{
            "address": "0x8909dc15e40173ff4699343b6eb8132c65e18ec6",
            "topics": ["0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9"],
            "data": "0x",
            "blockNumber": "0x64",
            "transactionHash": "0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9",
            "logIndex": "0x2"
        }"#;
        let log: LogEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(log.block().unwrap(), 100);
        assert_eq!(log.index().unwrap(), 2);
        assert!(!log.removed);
    }

    #[test]
    fn test_rpc_response_error_path() {
        let raw = r#"{"id": 1, "error": {"code": -32000, "message": "too many results"}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, FeedError::RpcError { code: -32000, .. }));
    }
}
