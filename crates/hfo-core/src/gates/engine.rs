// The generic eight-tile engine.
//
// Four tiles per session. Tile 0 opens (new session id + nonce), tile 1 is
// the work tile (requires the session nonce), tiles 2 and 3 each require a
// token minted by the previous tile. One tile per machine carries the
// PASSED/FAILED test gate: FAILED records the attempt, keeps the chain, and
// sends the agent back to the work tile — forward progress is blocked until
// a later pass reports PASSED.
//
// Tamper handling: a mismatched nonce/token returns status ERROR and writes
// a tamper_alert event so the breach is visible in stigmergy. The chain is
// never rolled back; the session simply stops advancing.

use crate::atoms::constants::CHAIN_GENESIS;
use crate::events::envelope::{canonical_json, random_hex};
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::gates::registry::{AgentRegistry, AuthResult};
use crate::paths::Paths;
use crate::statefile;
use crate::store::Store;
use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// One tile of a machine profile.
#[derive(Debug, Clone, Copy)]
pub struct TileSpec {
    /// Lowercase tile name, used in event types ("perceive", "hunt"…).
    pub name: &'static str,
    /// Uppercase gate name for authorization + chain steps ("HUNT"…).
    pub gate_name: &'static str,
    /// Status word returned on success ("PERCEIVED"…).
    pub status_word: &'static str,
    /// Name of the token/nonce this tile hands back ("perceive_nonce"…).
    pub token_field: &'static str,
    /// Operator instruction on success.
    pub instruction: &'static str,
}

/// Phase vocabulary for serialized session state. Generic internally,
/// machine words on disk and in responses.
#[derive(Debug, Clone, Copy)]
pub struct PhaseWords {
    pub idle: &'static str,
    pub opened: &'static str,
    pub worked: &'static str,
    pub checked: &'static str,
    pub test_failed: &'static str,
    pub complete: &'static str,
}

/// Everything that distinguishes PREY8 from HIVE8.
#[derive(Debug, Clone, Copy)]
pub struct MachineProfile {
    /// Machine name: "prey8" | "hive8". Session files and event types use it.
    pub machine: &'static str,
    pub tiles: [TileSpec; 4],
    /// Index of the tile carrying the PASSED/FAILED test gate (2 or 3).
    pub status_tile: usize,
    pub phases: PhaseWords,
    /// Model identity stamped into the session events' signal_metadata —
    /// the frontier model driving the loop, not a fleet daemon.
    pub model_id: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLink {
    pub step: String,
    pub hash: String,
}

/// Per-agent session state. Persisted to disk after every transition so a
/// restarted server resumes; the in-memory map is authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub agent_id: String,
    pub session_id: Option<String>,
    pub open_nonce: Option<String>,
    pub work_tokens: Vec<String>,
    pub check_tokens: Vec<String>,
    pub phase: String,
    pub chain: Vec<ChainLink>,
    pub started_at: Option<String>,
    pub saved_at: Option<String>,
}

/// What a tile call hands back. Always a data record, never an exception —
/// tamper and gate outcomes are values the caller can route on.
#[derive(Debug, Clone, Serialize)]
pub struct TileResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stigmergy_row_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TileResponse {
    fn blocked(reason: String) -> Self {
        TileResponse {
            status: "GATE_BLOCKED".into(),
            session_id: None,
            token: None,
            token_field: None,
            chain_hash: None,
            stigmergy_row_id: None,
            instruction: None,
            reason: Some(reason),
        }
    }

    fn error(reason: String) -> Self {
        TileResponse {
            status: "ERROR".into(),
            session_id: None,
            token: None,
            token_field: None,
            chain_hash: None,
            stigmergy_row_id: None,
            instruction: None,
            reason: Some(reason),
        }
    }
}

/// Chain link hash: SHA-256 over parent ‖ ":" ‖ nonce ‖ ":" ‖ canonical(data).
pub fn chain_hash(parent: &str, nonce: &str, data: &Value) -> String {
    let payload = format!("{}:{}:{}", parent, nonce, canonical_json(data));
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct TileMachine {
    profile: MachineProfile,
    registry: AgentRegistry,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl TileMachine {
    pub fn new(profile: MachineProfile) -> Self {
        TileMachine {
            profile,
            registry: AgentRegistry::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn profile(&self) -> &MachineProfile {
        &self.profile
    }

    /// Current session snapshot for an agent (operator inspection).
    pub fn session(&self, paths: &Paths, agent_id: &str) -> SessionState {
        let id = agent_id.trim().to_lowercase();
        let mut sessions = self.sessions.lock();
        self.load_session(paths, &mut sessions, &id).clone()
    }

    /// Place one tile. `supplied_token` is the nonce (tile 1) or the
    /// previous tile's token (tiles 2–3); `fields` are the structured
    /// non-empty gate fields; `test_status` is Some("PASSED"|"FAILED") on
    /// the machine's status tile.
    pub fn advance(
        &self,
        store: &Store,
        paths: &Paths,
        agent_id: &str,
        tile: usize,
        supplied_token: Option<&str>,
        fields: &[(&str, &str)],
        test_status: Option<&str>,
    ) -> TileResponse {
        let spec = &self.profile.tiles[tile];
        let phases = &self.profile.phases;

        // ── Gate 1: agent identity + least privilege ───────────────────
        if let AuthResult::Blocked(reason) =
            self.registry.authorize(agent_id, tile, spec.gate_name)
        {
            return TileResponse::blocked(reason);
        }
        let agent_id = agent_id.trim().to_lowercase();

        // ── Gate 2: structured fields must be non-empty ────────────────
        let empty: Vec<&str> = fields
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| *k)
            .collect();
        if !empty.is_empty() {
            return TileResponse::blocked(format!(
                "Missing required fields: {}",
                empty.join(", ")
            ));
        }

        // ── Gate 3: test gate vocabulary ───────────────────────────────
        if tile == self.profile.status_tile {
            match test_status {
                Some("PASSED") | Some("FAILED") => {}
                _ => {
                    return TileResponse::blocked(
                        "status must be 'PASSED' or 'FAILED'.".to_string(),
                    );
                }
            }
        }

        let mut sessions = self.sessions.lock();
        let session = self.load_session(paths, &mut sessions, &agent_id);

        // ── Gate 4: phase ──────────────────────────────────────────────
        let phase_ok = match tile {
            0 => {
                session.phase.is_empty()
                    || session.phase == phases.idle
                    || session.phase == phases.complete
            }
            1 => {
                session.phase == phases.opened
                    || session.phase == phases.checked
                    || session.phase == phases.test_failed
            }
            // The status tile may re-enter from its own failed phase, so an
            // agent can re-run tests without redoing the work tile.
            2 => {
                session.phase == phases.worked
                    || (self.profile.status_tile == 2 && session.phase == phases.test_failed)
            }
            _ => {
                session.phase == phases.checked
                    || (self.profile.status_tile == 3 && session.phase == phases.test_failed)
            }
        };
        if !phase_ok {
            return TileResponse::error(format!(
                "Cannot {} — current phase is '{}'.",
                spec.name, session.phase
            ));
        }

        // ── Gate 5: nonce / token continuity ───────────────────────────
        if tile > 0 {
            let supplied = supplied_token.unwrap_or("");
            let (ok, what) = match tile {
                1 => (
                    session.open_nonce.as_deref() == Some(supplied),
                    self.profile.tiles[0].token_field,
                ),
                2 => (
                    session.work_tokens.iter().any(|t| t == supplied),
                    self.profile.tiles[1].token_field,
                ),
                _ => (
                    session.check_tokens.iter().any(|t| t == supplied),
                    self.profile.tiles[2].token_field,
                ),
            };
            if !ok {
                let reason = format!("Tamper Alert: {} mismatch.", what);
                let row = self.write_session_event(
                    store,
                    paths,
                    "tamper_alert",
                    &agent_id,
                    session.session_id.as_deref().unwrap_or(""),
                    json!({
                        "agent_id": agent_id,
                        "tile": spec.name,
                        "reason": reason,
                    }),
                );
                warn!("[{}] {} from '{}'", self.profile.machine, reason, agent_id);
                let mut resp = TileResponse::error(reason);
                resp.stigmergy_row_id = row;
                return resp;
            }
        }

        // ── Gates passed: mutate the session ───────────────────────────
        let now = Utc::now().to_rfc3339();
        let minted: Option<String>;
        let link_nonce: String;
        let step_name: String;

        match tile {
            0 => {
                session.session_id = Some(random_hex(8));
                let nonce = random_hex(3).to_uppercase();
                session.open_nonce = Some(nonce.clone());
                session.work_tokens.clear();
                session.check_tokens.clear();
                session.chain.clear();
                session.started_at = Some(now.clone());
                session.phase = phases.opened.to_string();
                step_name = spec.gate_name.to_string();
                link_nonce = nonce.clone();
                minted = Some(nonce);
            }
            1 => {
                let token = random_hex(3).to_uppercase();
                session.work_tokens.push(token.clone());
                session.phase = phases.worked.to_string();
                step_name = format!("{}_{}", spec.gate_name, session.work_tokens.len());
                link_nonce = token.clone();
                minted = Some(token);
            }
            2 => {
                let token = random_hex(3).to_uppercase();
                session.check_tokens.push(token.clone());
                session.phase = if tile == self.profile.status_tile
                    && test_status == Some("FAILED")
                {
                    phases.test_failed.to_string()
                } else {
                    phases.checked.to_string()
                };
                step_name = format!("{}_{}", spec.gate_name, session.check_tokens.len());
                link_nonce = token.clone();
                minted = Some(token);
            }
            _ => {
                session.phase = if tile == self.profile.status_tile
                    && test_status == Some("FAILED")
                {
                    phases.test_failed.to_string()
                } else {
                    phases.complete.to_string()
                };
                step_name = spec.gate_name.to_string();
                link_nonce = spec.gate_name.to_string();
                minted = None;
            }
        }

        // ── Chain append + event ───────────────────────────────────────
        let mut event_data = serde_json::Map::new();
        event_data.insert("agent_id".into(), json!(agent_id));
        event_data.insert(
            "session_id".into(),
            json!(session.session_id.clone().unwrap_or_default()),
        );
        if let Some(ref t) = minted {
            let key = if tile == 0 { "nonce" } else { "token" };
            event_data.insert(key.into(), json!(t));
        }
        for (k, v) in fields {
            event_data.insert((*k).into(), json!(v));
        }
        if let Some(status) = test_status {
            if tile == self.profile.status_tile {
                event_data.insert("status".into(), json!(status));
            }
        }
        let event_data = Value::Object(event_data);

        let parent = session
            .chain
            .last()
            .map(|l| l.hash.clone())
            .unwrap_or_else(|| CHAIN_GENESIS.to_string());
        let hash = chain_hash(&parent, &link_nonce, &event_data);
        session.chain.push(ChainLink { step: step_name, hash: hash.clone() });

        let row_id = self.write_session_event(
            store,
            paths,
            spec.name,
            &agent_id,
            session.session_id.as_deref().unwrap_or(""),
            event_data,
        );

        session.saved_at = Some(now);
        statefile::save_best_effort(
            &paths.session_state(self.profile.machine, &agent_id),
            session,
        );

        // ── Response ───────────────────────────────────────────────────
        let failed = tile == self.profile.status_tile && test_status == Some("FAILED");
        let status = if failed {
            format!("{}_FAILED", spec.gate_name)
        } else {
            spec.status_word.to_string()
        };
        let instruction = if failed {
            format!(
                "TESTS FAILED. You are blocked from {}. You MUST call {} again to fix the work.",
                self.profile.tiles[3].name, self.profile.tiles[1].name
            )
        } else {
            spec.instruction.to_string()
        };
        info!(
            "[{}] {} '{}' → {}",
            self.profile.machine, spec.name, agent_id, status
        );

        TileResponse {
            status,
            session_id: session.session_id.clone(),
            token: minted,
            token_field: Some(spec.token_field.to_string()),
            chain_hash: Some(hash),
            stigmergy_row_id: row_id,
            instruction: Some(instruction),
            reason: None,
        }
    }

    /// Load a session from memory, falling back to the on-disk snapshot.
    /// Disk is best-effort backup; once loaded, memory wins.
    fn load_session<'a>(
        &self,
        paths: &Paths,
        sessions: &'a mut HashMap<String, SessionState>,
        agent_id: &str,
    ) -> &'a mut SessionState {
        sessions.entry(agent_id.to_string()).or_insert_with(|| {
            let path = paths.session_state(self.profile.machine, agent_id);
            let mut state: SessionState = statefile::load(&path).unwrap_or_default();
            if state.phase.is_empty() {
                state.phase = self.profile.phases.idle.to_string();
            }
            state.agent_id = agent_id.to_string();
            state
        })
    }

    /// Session events go through the canonical writer. The machine event
    /// types are exempt from the DB trigger, but metadata is attached anyway
    /// so the coordinator's audits see these events like any other.
    fn write_session_event(
        &self,
        store: &Store,
        paths: &Paths,
        suffix: &str,
        agent_id: &str,
        session_id: &str,
        data: Value,
    ) -> Option<i64> {
        let sig = build_signal_metadata(
            &self.registry.primary_port(agent_id),
            self.profile.model_id,
            &format!("{}_{}", self.profile.machine, agent_id),
            "v1.0",
            &paths.generation,
            Observations::default(),
        );
        let event_type = paths.event_type(&format!("{}.{}", self.profile.machine, suffix));
        let subject = format!("{}:{}:{}", self.profile.machine, suffix, session_id);
        match write_event(store, paths, &event_type, &subject, data, Some(&sig), None) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("[{}] event write failed: {}", self.profile.machine, e);
                None
            }
        }
    }
}
