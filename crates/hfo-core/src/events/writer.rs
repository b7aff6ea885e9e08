// The canonical event writer — the ONE sink for stigmergy events.
//
// Contract, in order:
//   1. Type gate:  no signal_metadata record → gate-block event + typed error
//   2. Field gate: required fields empty/missing → gate-block event + error
//   3. CloudEvents envelope, content hash over canonical JSON
//   4. INSERT OR IGNORE — content-hash collision is dedup, returns 0
//
// The database trigger (store::schema) backstops this gate for code that
// bypasses the writer. Daemons cannot quietly emit under-specified telemetry.

use crate::atoms::constants::REQUIRED_SIGNAL_FIELDS;
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::SignalMetadata;
use crate::events::envelope;
use crate::paths::Paths;
use crate::store::Store;
use log::warn;
use serde_json::{json, Value};
use std::panic::Location;

/// Missing-or-empty required field names. Empty list = valid.
pub fn validate_signal_fields(sig: &Value) -> Vec<String> {
    REQUIRED_SIGNAL_FIELDS
        .iter()
        .filter(|field| {
            match sig.get(**field) {
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(Value::Null) | None => true,
                Some(_) => false,
            }
        })
        .map(|f| f.to_string())
        .collect()
}

/// Write one stigmergy event. Returns the new row id, or 0 on dedup.
///
/// `signal`: REQUIRED for every caller — `None` exists so the gate has
/// something to reject (and so tests can exercise it). `source` defaults to
/// a tag derived from the daemon name and port.
#[track_caller]
pub fn write_event(
    store: &Store,
    paths: &Paths,
    event_type: &str,
    subject: &str,
    data: Value,
    signal: Option<&SignalMetadata>,
    source: Option<&str>,
) -> CoreResult<i64> {
    let caller = Location::caller();
    let caller_tag = format!("{}:{}", caller.file(), caller.line());

    // ── Gate 1: record must exist ──────────────────────────────────────
    let signal = match signal {
        Some(s) => s,
        None => {
            log_gate_block(
                store,
                paths,
                "signal_metadata_missing",
                json!({
                    "event_type": event_type,
                    "caller": caller_tag,
                    "hint": "build it with events::build_signal_metadata()",
                }),
            );
            return Err(CoreError::SignalMetadataMissing);
        }
    };

    // ── Gate 2: required fields non-empty ──────────────────────────────
    let sig_value = serde_json::to_value(signal)?;
    let missing = validate_signal_fields(&sig_value);
    if !missing.is_empty() {
        log_gate_block(
            store,
            paths,
            "signal_metadata_incomplete",
            json!({
                "event_type": event_type,
                "caller": caller_tag,
                "missing_fields": missing,
            }),
        );
        return Err(CoreError::SignalMetadataIncomplete { missing });
    }

    // ── Passed gates. Build the CloudEvents envelope. ──────────────────
    let source = match source {
        Some(s) => s.to_string(),
        None => format!(
            "hfo_{}_gen{}_{}",
            signal.daemon_name.to_lowercase().replace(' ', "_"),
            paths.generation,
            signal.port.to_lowercase(),
        ),
    };

    let mut enriched = match data {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".into(), other);
            map
        }
    };
    enriched.insert("signal_metadata".into(), sig_value);

    insert_envelope(store, event_type, subject, &source, Value::Object(enriched))
}

/// Build, hash, and insert one envelope. Shared by the normal path and the
/// gate-block path (which is exempt from the signal-metadata requirement).
fn insert_envelope(
    store: &Store,
    event_type: &str,
    subject: &str,
    source: &str,
    data: Value,
) -> CoreResult<i64> {
    let env = envelope::build(event_type, source, subject, data);
    let hash = envelope::content_hash(&env);
    let timestamp = env["time"].as_str().unwrap_or_default().to_string();

    let conn = store.conn.lock();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO stigmergy_events
         (event_type, timestamp, subject, source, data_json, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            event_type,
            timestamp,
            subject,
            source,
            envelope::canonical_json(&env),
            hash
        ],
    )?;
    if changed == 0 {
        // Content hash collision — dedup.
        return Ok(0);
    }
    Ok(conn.last_insert_rowid())
}

/// Persist a gate-block event so every rejection is visible in stigmergy.
/// This event type is exempt from the trigger (chicken-and-egg). Failures
/// here are logged, not raised — the typed error is already on its way up.
fn log_gate_block(store: &Store, paths: &Paths, reason: &str, details: Value) {
    let event_type = paths.event_type("ssot_write.gate_block");
    let subject = format!("gate_block:{}", reason);
    let data = json!({
        "reason": reason,
        "gate": "signal_metadata_schema",
        "details": details,
    });
    if let Err(e) = insert_envelope(
        store,
        &event_type,
        &subject,
        &format!("hfo_ssot_write_gen{}", paths.generation),
        data,
    ) {
        warn!("[ssot_write] could not persist gate_block event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::signal::{build_signal_metadata, Observations};
    use std::path::PathBuf;

    fn test_ctx() -> (Store, Paths) {
        (
            Store::open_in_memory("90").unwrap(),
            Paths::at_root(PathBuf::from("/tmp"), "90"),
        )
    }

    fn valid_signal() -> SignalMetadata {
        build_signal_metadata("P4", "gemma3:4b", "SelfTest", "v1.0", "90", Observations::default())
    }

    #[test]
    fn canonical_write_then_dedup() {
        let (store, paths) = test_ctx();
        let sig = valid_signal();

        let row = write_event(
            &store,
            &paths,
            "hfo.gen90.self_test",
            "self_test:canonical_write",
            json!({"test": true}),
            Some(&sig),
            None,
        )
        .unwrap();
        assert!(row > 0);

        // The stored row re-hashes to its own content_hash.
        let (data_json, hash): (String, String) = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT data_json, content_hash FROM stigmergy_events WHERE id = ?1",
                [row],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
        };
        let env: Value = serde_json::from_str(&data_json).unwrap();
        assert_eq!(envelope::content_hash(&env), hash);
        assert_eq!(env["data"]["signal_metadata"]["model_id"], "gemma3:4b");

        // Identical arguments → identical content hash → dedup, returns 0.
        let again = write_event(
            &store,
            &paths,
            "hfo.gen90.self_test",
            "self_test:canonical_write",
            json!({"test": true}),
            Some(&sig),
            None,
        )
        .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn missing_record_blocks_and_logs() {
        let (store, paths) = test_ctx();
        let err = write_event(
            &store,
            &paths,
            "hfo.gen90.self_test",
            "s",
            json!({}),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::SignalMetadataMissing));

        let blocks: i64 = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT COUNT(*) FROM stigmergy_events
                 WHERE event_type = 'hfo.gen90.ssot_write.gate_block'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(blocks, 1);
    }

    #[test]
    fn incomplete_record_reports_missing_fields() {
        let (store, paths) = test_ctx();
        let mut sig = valid_signal();
        sig.model_id = String::new();
        sig.daemon_name = "X".into();

        let err = write_event(
            &store,
            &paths,
            "hfo.gen90.self_test",
            "s",
            json!({}),
            Some(&sig),
            None,
        )
        .unwrap_err();
        match err {
            CoreError::SignalMetadataIncomplete { missing } => {
                assert_eq!(missing, vec!["model_id".to_string()]);
            }
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[test]
    fn validate_treats_empty_like_missing() {
        let sig = json!({"port": "P4", "model_id": "", "daemon_name": "X", "model_provider": "y"});
        assert_eq!(validate_signal_fields(&sig), vec!["model_id".to_string()]);

        let sig = json!({"port": "P4"});
        assert_eq!(
            validate_signal_fields(&sig),
            vec!["model_id".to_string(), "daemon_name".to_string(), "model_provider".to_string()]
        );
    }

    #[test]
    fn source_is_derived_from_daemon_and_port() {
        let (store, paths) = test_ctx();
        let sig = valid_signal();
        write_event(
            &store,
            &paths,
            "hfo.gen90.self_test",
            "s",
            json!({}),
            Some(&sig),
            None,
        )
        .unwrap();
        let source: String = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT source FROM stigmergy_events WHERE event_type = 'hfo.gen90.self_test'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(source, "hfo_selftest_gen90_p4");
    }
}
