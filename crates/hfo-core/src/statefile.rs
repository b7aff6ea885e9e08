// JSON state files — best-effort atomic persistence for supervisor and
// session state. Writers replace via a sibling temp file + rename; readers
// tolerate absence and decode errors by handing back the default value.
// These files are backup, not truth: the in-process state always wins.

use crate::atoms::error::CoreResult;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a state file, or `T::default()` when it is missing or unreadable.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!("[state] {} is corrupt ({}) — starting fresh", path.display(), e);
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

/// Load a state file if present and parseable.
pub fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Atomically replace `path` with the serialized value. The temp file lives
/// next to the target so the rename stays on one filesystem.
pub fn save<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Save, logging instead of failing. For the paths where disk is advisory.
pub fn save_best_effort<T: Serialize>(path: &Path, value: &T) {
    if let Err(e) = save(path, value) {
        warn!("[state] could not persist {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Demo {
        count: u32,
        name: String,
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".demo_state.json");
        let v = Demo { count: 7, name: "fleet".into() };
        save(&path, &v).unwrap();
        let back: Demo = load_or_default(&path);
        assert_eq!(back, v);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let back: Demo = load_or_default(&dir.path().join("nope.json"));
        assert_eq!(back, Demo::default());
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".demo_state.json");
        std::fs::write(&path, "{not json").unwrap();
        let back: Demo = load_or_default(&path);
        assert_eq!(back, Demo::default());
    }
}
