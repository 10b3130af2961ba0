// =============================================================================
// Small shared helpers
// =============================================================================

use rand::Rng;

/// Current wall-clock time as fractional epoch seconds.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Reconnect backoff for attempt `n`: `min(60, 2^n)` seconds plus uniform
/// jitter in `[0, 1)`.
pub fn backoff_secs(n: u32) -> f64 {
    let base = 2_f64.powi(n.min(6) as i32).min(60.0);
    base + rand::thread_rng().gen_range(0.0..1.0)
}

/// Parse a JSON value that Binance encodes either as a string ("37000.00")
/// or as a plain number.
pub fn json_f64(val: &serde_json::Value, name: &str) -> anyhow::Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| anyhow::anyhow!("failed to parse {name} as f64: {s} ({e})")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}
