// Fleet paths — HFO_ROOT resolution and the pointer registry.
//
// Every process resolves its paths exactly once at startup and carries the
// result around explicitly (no module-level globals). Resolution order for
// the project root: HFO_ROOT env var → nearest ancestor of cwd containing
// `pointers_blessed.json` → home `.hfo` directory → cwd.

use crate::atoms::constants::DEFAULT_GENERATION;
use log::warn;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Name of the pointer registry file at the project root.
pub const POINTER_FILE: &str = "pointers_blessed.json";

/// Resolved filesystem layout for one fleet process.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Project root. All state files live directly under it.
    pub root: PathBuf,
    /// Generation string — event-type prefixes and trigger exempt patterns
    /// derive from it.
    pub generation: String,
    /// The SSOT database file.
    pub db: PathBuf,
}

impl Paths {
    /// Resolve from the environment. Never fails — missing pieces fall back
    /// to defaults so read paths can at least report "store unavailable".
    pub fn resolve() -> Self {
        let root = find_root();
        let generation =
            std::env::var("HFO_GENERATION").unwrap_or_else(|_| DEFAULT_GENERATION.to_string());
        let db = resolve_ssot(&root);
        Paths {
            root,
            generation,
            db,
        }
    }

    /// Resolve against an explicit root (tests, --root overrides).
    pub fn at_root(root: PathBuf, generation: &str) -> Self {
        let db = resolve_ssot(&root);
        Paths {
            root,
            generation: generation.to_string(),
            db,
        }
    }

    /// Dotted event-type namespace for this generation, e.g. `hfo.gen90`.
    pub fn namespace(&self) -> String {
        format!("hfo.gen{}", self.generation)
    }

    /// Namespace of the generation before this one (exempt in the trigger
    /// for cross-generation compatibility).
    pub fn prior_namespace(&self) -> String {
        match self.generation.parse::<u64>() {
            Ok(n) if n > 0 => format!("hfo.gen{}", n - 1),
            _ => format!("hfo.gen{}.prior", self.generation),
        }
    }

    /// Full event type under this generation's namespace.
    pub fn event_type(&self, suffix: &str) -> String {
        format!("{}.{}", self.namespace(), suffix)
    }

    // ── State files at the root ────────────────────────────────────────────

    pub fn fleet_state(&self) -> PathBuf {
        self.root.join(".fleet_state.json")
    }

    pub fn fleet_spec(&self) -> PathBuf {
        self.root.join("fleet.json")
    }

    pub fn defense_state(&self) -> PathBuf {
        self.root.join(".p5_supervisor_state.json")
    }

    pub fn defense_watermark(&self) -> PathBuf {
        self.root.join(".p5_supervisor_watermark.json")
    }

    pub fn wish_state(&self) -> PathBuf {
        self.root.join(".p7_wish_state.json")
    }

    /// Per-agent session state for a gated machine ("prey8" / "hive8").
    pub fn session_state(&self, machine: &str, agent_id: &str) -> PathBuf {
        let safe: String = agent_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!(".{}_session_{}.json", machine, safe))
    }
}

/// Locate the project root. See module docs for the search order.
fn find_root() -> PathBuf {
    if let Ok(env_root) = std::env::var("HFO_ROOT") {
        let p = PathBuf::from(env_root);
        if p.is_dir() {
            return p;
        }
        warn!("[paths] HFO_ROOT is set but not a directory — ignoring");
    }

    if let Ok(cwd) = std::env::current_dir() {
        for candidate in std::iter::once(cwd.as_path()).chain(cwd.ancestors().skip(1)) {
            if candidate.join(POINTER_FILE).exists() {
                return candidate.to_path_buf();
            }
        }
        // No pointer file anywhere above us — prefer a stable home dir over
        // scattering state files into whatever directory we were launched from.
        if let Some(home) = dirs::home_dir() {
            let dir = home.join(".hfo");
            if dir.is_dir() {
                return dir;
            }
        }
        return cwd;
    }

    PathBuf::from(".")
}

/// Resolve the SSOT database path through the pointer registry, falling back
/// to `ssot.sqlite` under the root. Decode errors are tolerated.
fn resolve_ssot(root: &Path) -> PathBuf {
    let pf = root.join(POINTER_FILE);
    if let Ok(text) = std::fs::read_to_string(&pf) {
        if let Ok(v) = serde_json::from_str::<Value>(&text) {
            let ptrs = v.get("pointers").unwrap_or(&v);
            if let Some(entry) = ptrs.get("ssot.db") {
                let rel = entry
                    .get("path")
                    .and_then(Value::as_str)
                    .or_else(|| entry.as_str());
                if let Some(rel) = rel {
                    return root.join(rel);
                }
            }
        } else {
            warn!("[paths] {} is not valid JSON — using default DB path", POINTER_FILE);
        }
    }
    root.join("ssot.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_derivation() {
        let p = Paths::at_root(PathBuf::from("/tmp"), "90");
        assert_eq!(p.namespace(), "hfo.gen90");
        assert_eq!(p.prior_namespace(), "hfo.gen89");
        assert_eq!(p.event_type("scheduler.heartbeat"), "hfo.gen90.scheduler.heartbeat");
    }

    #[test]
    fn session_state_path_is_sanitized() {
        let p = Paths::at_root(PathBuf::from("/tmp"), "90");
        let path = p.session_state("prey8", "p4_red/../evil");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, ".prey8_session_p4_red____evil.json");
    }

    #[test]
    fn pointer_registry_resolves_db() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(POINTER_FILE),
            r#"{"pointers": {"ssot.db": {"path": "gold/ssot.sqlite"}}}"#,
        )
        .unwrap();
        let p = Paths::at_root(dir.path().to_path_buf(), "90");
        assert_eq!(p.db, dir.path().join("gold/ssot.sqlite"));
    }

    #[test]
    fn missing_pointer_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let p = Paths::at_root(dir.path().to_path_buf(), "90");
        assert_eq!(p.db, dir.path().join("ssot.sqlite"));
    }
}
