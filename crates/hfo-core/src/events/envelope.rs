// CloudEvents 1.0 envelope construction and content addressing.
//
// The content hash is SHA-256 over the canonical JSON of the whole envelope.
// serde_json's default Map is a BTreeMap, so `Value` serialization is
// key-sorted — canonical for free, at every nesting level. Do NOT enable
// serde_json's `preserve_order` feature; it would silently change every hash.

use chrono::Utc;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Random lowercase hex string of `n` bytes (2n chars).
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 16-hex envelope id derived from type + time + randomness.
pub fn event_id(event_type: &str, now: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_bytes());
    hasher.update(now.as_bytes());
    hasher.update(random_hex(4).as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Canonical JSON: serde_json::Value with sorted keys (the default Map).
pub fn canonical_json(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

/// Envelope fields that change on every write regardless of content. They
/// are excluded from the content hash so a byte-identical payload written
/// twice collapses to one row — dedup is argument-level, not replay-level.
const VOLATILE_KEYS: [&str; 6] = ["id", "time", "timestamp", "trace_id", "span_id", "traceparent"];

/// The hashed projection of an envelope: everything except the volatile
/// per-write fields.
pub fn stable_view(envelope: &Value) -> Value {
    match envelope {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if !VOLATILE_KEYS.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// SHA-256 hex over the canonical JSON of the envelope's stable projection.
pub fn content_hash(envelope: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&stable_view(envelope)).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build a CloudEvents 1.0 envelope. `data` already carries signal_metadata
/// when the event is non-exempt; the writer owns that merge.
pub fn build(event_type: &str, source: &str, subject: &str, data: Value) -> Value {
    let now = Utc::now().to_rfc3339();
    let trace_id = random_hex(16);
    let span_id = random_hex(8);
    json!({
        "specversion": "1.0",
        "id": event_id(event_type, &now),
        "type": event_type,
        "source": source,
        "subject": subject,
        "time": now,
        "timestamp": now,
        "datacontenttype": "application/json",
        "trace_id": trace_id,
        "span_id": span_id,
        "traceparent": format!("00-{}-{}-01", trace_id, span_id),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        let v = json!({"zeta": 1, "alpha": {"nested_z": 2, "nested_a": 3}});
        assert_eq!(
            canonical_json(&v),
            r#"{"alpha":{"nested_a":3,"nested_z":2},"zeta":1}"#
        );
    }

    #[test]
    fn same_value_same_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn rebuilt_envelope_hashes_identically() {
        let data = json!({"k": "v", "signal_metadata": {"port": "P4"}});
        let a = build("hfo.gen90.t", "src", "subj", data.clone());
        let b = build("hfo.gen90.t", "src", "subj", data);
        // id/time/trace differ between the two builds…
        assert_ne!(a["id"], b["id"]);
        // …but the content hash sees only the stable projection.
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn envelope_shape() {
        let env = build("hfo.gen90.self_test", "test_source", "subj", json!({"k": "v"}));
        assert_eq!(env["specversion"], "1.0");
        assert_eq!(env["type"], "hfo.gen90.self_test");
        assert_eq!(env["id"].as_str().unwrap().len(), 16);
        assert_eq!(env["time"], env["timestamp"]);
        let tp = env["traceparent"].as_str().unwrap();
        assert!(tp.starts_with("00-") && tp.ends_with("-01"));
        assert_eq!(tp.len(), 2 + 1 + 32 + 1 + 16 + 1 + 2);
    }
}
