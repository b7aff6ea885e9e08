// ── Fleet Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Network…) with `#[from]`
//     conversions, EXCEPT the structural-gate errors, which are their own
//     variants so callers can match on them. Structural errors are fatal at
//     the point of use and always ride alongside a persisted gate-block event.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The SSOT database file does not exist and the caller is not `migrate`.
    #[error("Store unavailable: {path} (run `hfo migrate --execute` to create it)")]
    StoreUnavailable { path: String },

    /// write_event called without a signal_metadata record.
    #[error("signal_metadata is required — build it with build_signal_metadata()")]
    SignalMetadataMissing,

    /// signal_metadata lacks required fields or has empty values.
    #[error("signal_metadata incomplete — missing or empty: {}", missing.join(", "))]
    SignalMetadataIncomplete { missing: Vec<String> },

    /// No compute_route row for (port, daemon, task) even after the
    /// 'default' fallback. The daemon cannot select a model and must not start.
    #[error("no compute_route entry for {port}/{daemon}/{task} — add one with `hfo route set`")]
    NoRoute {
        port: String,
        daemon: String,
        task: String,
    },

    /// A fail-closed gate rejected the operation (database trigger, agent
    /// registry, or session machine).
    #[error("gate blocked: {0}")]
    GateBlocked(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Process exit code for CLI tools: 1 for typed core errors.
    /// (Usage errors exit 2 via clap before we get here.)
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// True for the structural-gate family — the errors that always have a
    /// persisted gate-block event next to them.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CoreError::SignalMetadataMissing
                | CoreError::SignalMetadataIncomplete { .. }
                | CoreError::NoRoute { .. }
                | CoreError::GateBlocked(_)
        )
    }
}

// ── Migration bridge: String → CoreError ───────────────────────────────────
// Allows `?` on helpers that hand back plain string messages.

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

/// All engine operations return this type.
pub type CoreResult<T> = Result<T, CoreError>;
