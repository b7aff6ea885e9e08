// Runtime context — the one value a fleet process builds at startup and
// passes everywhere. No module-level globals: paths, generation, and the
// store handle travel together, explicitly.

use crate::atoms::error::CoreResult;
use crate::paths::Paths;
use crate::store::Store;

pub struct Runtime {
    pub paths: Paths,
    pub store: Store,
}

impl Runtime {
    /// Read-write runtime for daemons and writers. Fails with
    /// StoreUnavailable when the SSOT has not been migrated yet.
    pub fn open_rw() -> CoreResult<Self> {
        let paths = Paths::resolve();
        let store = Store::open_rw(&paths.db)?;
        Ok(Runtime { paths, store })
    }

    /// Read-only runtime for audit and status tools.
    pub fn open_ro() -> CoreResult<Self> {
        let paths = Paths::resolve();
        let store = Store::open_ro(&paths.db)?;
        Ok(Runtime { paths, store })
    }

    /// Create-or-upgrade the store, then hand back a read-write runtime.
    pub fn migrate() -> CoreResult<Self> {
        let paths = Paths::resolve();
        let store = Store::migrate(&paths.db, &paths.generation)?;
        Ok(Runtime { paths, store })
    }

    /// In-memory runtime rooted at a temp dir, for tests.
    pub fn in_memory(root: std::path::PathBuf, generation: &str) -> CoreResult<Self> {
        let paths = Paths::at_root(root, generation);
        let store = Store::open_in_memory(generation)?;
        Ok(Runtime { paths, store })
    }
}
