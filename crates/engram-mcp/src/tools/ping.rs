//! ping tool — liveness probe.

use chrono::Utc;

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute() -> serde_json::Value {
    serde_json::json!({
        "response": "pong",
        "timestamp": Utc::now().to_rfc3339(),
        "status": "success",
    })
}
