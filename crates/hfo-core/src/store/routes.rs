// compute_route — model selection as structured data.
//
// A daemon that has no route cannot select a model and therefore cannot
// start. get_route never fabricates a default: exact task_type, then the
// 'default' task_type, then a typed NoRoute error.

use super::Store;
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::ComputeRoute;
use chrono::Utc;
use rusqlite::params;

fn route_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ComputeRoute> {
    Ok(ComputeRoute {
        port: row.get(0)?,
        daemon_name: row.get(1)?,
        task_type: row.get(2)?,
        model_id: row.get(3)?,
        provider: row.get(4)?,
        priority: row.get(5)?,
        updated_at: row.get(6)?,
        updated_by: row.get(7)?,
        reason: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
    })
}

const ROUTE_COLS: &str =
    "port, daemon_name, task_type, model_id, provider, priority, updated_at, updated_by, reason";

impl Store {
    /// Route for (port, daemon, task). Fallback chain:
    /// exact task_type → 'default' task_type → NoRoute.
    pub fn get_route(&self, port: &str, daemon: &str, task_type: &str) -> CoreResult<ComputeRoute> {
        let port = port.to_uppercase();
        let conn = self.conn.lock();

        let lookup = |task: &str| -> CoreResult<Option<ComputeRoute>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROUTE_COLS} FROM compute_route
                 WHERE port = ?1 AND daemon_name = ?2 AND task_type = ?3"
            ))?;
            match stmt.query_row(params![port, daemon, task], route_from_row) {
                Ok(r) => Ok(Some(r)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        };

        if let Some(route) = lookup(task_type)? {
            return Ok(route);
        }
        if task_type != "default" {
            if let Some(route) = lookup("default")? {
                return Ok(route);
            }
        }
        Err(CoreError::NoRoute {
            port,
            daemon: daemon.to_string(),
            task: task_type.to_string(),
        })
    }

    /// Set or update a route. Used by coordinator, operator, or migration.
    #[allow(clippy::too_many_arguments)]
    pub fn set_route(
        &self,
        port: &str,
        daemon: &str,
        model_id: &str,
        provider: &str,
        task_type: &str,
        updated_by: &str,
        reason: &str,
        priority: i64,
    ) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO compute_route
             (port, daemon_name, task_type, model_id, provider, priority, updated_at, updated_by, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                port.to_uppercase(),
                daemon,
                task_type,
                model_id,
                provider,
                priority,
                Utc::now().to_rfc3339(),
                updated_by,
                reason,
            ],
        )?;
        Ok(())
    }

    /// All routes, ordered for operator display.
    pub fn list_routes(&self) -> CoreResult<Vec<ComputeRoute>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUTE_COLS} FROM compute_route ORDER BY port, daemon_name, task_type"
        ))?;
        let rows = stmt
            .query_map([], route_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_default() {
        let store = Store::open_in_memory("90").unwrap();
        let r = store.get_route("P4", "Singer", "code_eval").unwrap();
        assert_eq!(r.task_type, "code_eval");
    }

    #[test]
    fn unknown_task_falls_back_to_default() {
        let store = Store::open_in_memory("90").unwrap();
        let r = store.get_route("P4", "Singer", "poetry").unwrap();
        assert_eq!(r.task_type, "default");
        assert_eq!(r.model_id, "gemma3:4b");
    }

    #[test]
    fn missing_route_is_typed_error() {
        let store = Store::open_in_memory("90").unwrap();
        let err = store.get_route("P9", "Singer", "default").unwrap_err();
        match err {
            CoreError::NoRoute { port, daemon, .. } => {
                assert_eq!(port, "P9");
                assert_eq!(daemon, "Singer");
            }
            other => panic!("expected NoRoute, got {:?}", other),
        }
    }

    #[test]
    fn set_then_get_returns_last_write() {
        let store = Store::open_in_memory("90").unwrap();
        store
            .set_route("p4", "Singer", "phi4:14b", "ollama", "default", "test", "swap", 1)
            .unwrap();
        let r = store.get_route("P4", "Singer", "default").unwrap();
        assert_eq!(r.model_id, "phi4:14b");
        assert_eq!(r.updated_by, "test");
        assert_eq!(r.priority, 1);
    }
}
