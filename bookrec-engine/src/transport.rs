use std::io::{self, Stdout, Write};
use std::sync::Mutex;

use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcResponse};

/// Line-delimited JSON-RPC 2.0 output. Each message is serialized, terminated
/// with `\n` and flushed before the next one is written.
///
/// The default sink is stdout; logs go to stderr so the two never interleave.
pub struct NdjsonTransport<W: Write = Stdout> {
    out: Mutex<W>,
}

impl Default for NdjsonTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NdjsonTransport {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl<W: Write> NdjsonTransport<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn write_response(&self, id: u64, result: serde_json::Value) {
        self.write_line(&JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        });
    }

    pub fn write_error(&self, id: u64, code: i32, message: impl Into<String>) {
        self.write_error_with_data(id, code, message, None);
    }

    /// Error response whose `data` member carries the typed error code and
    /// any extra fields (e.g. `similarTitles`).
    pub fn write_error_with_data(
        &self,
        id: u64,
        code: i32,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.write_line(&JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        });
    }

    pub fn write_notification(&self, method: &str, params: serde_json::Value) {
        self.write_line(&JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params: Some(params),
        });
    }

    fn write_line(&self, value: &impl serde::Serialize) {
        let mut line = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };
        line.push(b'\n');

        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = out.write_all(&line).and_then(|()| out.flush()) {
            tracing::error!(error = %e, "Failed to write message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RECOMMEND_ERROR;

    fn lines(transport: NdjsonTransport<Vec<u8>>) -> Vec<serde_json::Value> {
        let bytes = transport.into_inner();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn one_message_per_line() {
        let t = NdjsonTransport::with_writer(Vec::new());
        t.write_notification("server/ready", serde_json::json!({"algorithms": []}));
        t.write_response(1, serde_json::json!({"ok": true}));
        t.write_error(2, -32601, "Method not found: nope");

        let msgs = lines(t);
        assert_eq!(msgs.len(), 3);
        assert!(msgs[0].get("id").is_none());
        assert_eq!(msgs[0]["method"], "server/ready");
        assert_eq!(msgs[1]["id"], 1);
        assert_eq!(msgs[1]["result"]["ok"], true);
        assert_eq!(msgs[2]["error"]["code"], -32601);
        assert!(msgs[2]["error"].get("data").is_none());
    }

    #[test]
    fn error_data_is_passed_through() {
        let t = NdjsonTransport::with_writer(Vec::new());
        t.write_error_with_data(
            9,
            RECOMMEND_ERROR,
            "No exact title match for 'x'",
            Some(serde_json::json!({"code": "TITLE_NOT_FOUND", "similarTitles": ["X-Men"]})),
        );

        let msgs = lines(t);
        assert_eq!(msgs[0]["jsonrpc"], "2.0");
        assert_eq!(msgs[0]["error"]["data"]["code"], "TITLE_NOT_FOUND");
        assert_eq!(msgs[0]["error"]["data"]["similarTitles"][0], "X-Men");
        assert!(msgs[0].get("result").is_none());
    }
}
