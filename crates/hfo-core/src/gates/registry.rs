// Agent registry — deny-by-default authorization for the gated machines.
//
// Unknown agent ids are GATE_BLOCKED unless they match a dynamic pattern:
// `p<digit>…` registers a single-port swarm node, `swarm_…` / `agent_…`
// registers a full-access node. Everything else stays locked out.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Tile indices an agent may place: 0=open, 1=work, 2=check, 3=close.
pub const ALL_TILES: [usize; 4] = [0, 1, 2, 3];

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub display_name: String,
    pub ports: Vec<u8>,
    pub allowed_tiles: Vec<usize>,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone)]
pub enum AuthResult {
    Allowed,
    /// Deny-by-default or least-privilege rejection. Carries the reason
    /// handed back to the caller.
    Blocked(String),
}

pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentSpec>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        let mut agents = HashMap::new();
        let mut add = |id: &str, name: &str, ports: &[u8], tiles: &[usize]| {
            agents.insert(
                id.to_string(),
                AgentSpec {
                    display_name: name.to_string(),
                    ports: ports.to_vec(),
                    allowed_tiles: tiles.to_vec(),
                },
            );
        };
        add("p0_lidless_legion", "P0 Lidless Legion", &[0, 6], &[0, 2]);
        add("p1_web_weaver", "P1 Web Weaver", &[1, 7], &[0, 3]);
        add("p2_mirror_magus", "P2 Mirror Magus", &[2, 4], &[1]);
        add("p3_harmonic_hydra", "P3 Harmonic Hydra", &[3, 5], &[2, 3]);
        add("p4_red_regnant", "P4 Red Regnant", &[0, 1, 2, 3, 4, 5, 6, 7], &ALL_TILES);
        add("p5_pyre_praetorian", "P5 Pyre Praetorian", &[0, 1, 2, 3, 4, 5, 6, 7], &ALL_TILES);
        add("p6_kraken_keeper", "P6 Kraken Keeper", &[0, 6], &[0, 2]);
        add("p7_spider_sovereign", "P7 Spider Sovereign", &[0, 1, 2, 3, 4, 5, 6, 7], &ALL_TILES);
        add("operator", "Operator (Human)", &[0, 1, 2, 3, 4, 5, 6, 7], &ALL_TILES);
        AgentRegistry { agents: Mutex::new(agents) }
    }

    /// Check that `agent_id` exists (auto-registering dynamic patterns) and
    /// may place `tile` (named `gate_name` in operator-facing messages).
    pub fn authorize(&self, agent_id: &str, tile: usize, gate_name: &str) -> AuthResult {
        let id = agent_id.trim().to_lowercase();
        if id.is_empty() {
            return AuthResult::Blocked("DENY_BY_DEFAULT: agent_id is required.".into());
        }

        let mut agents = self.agents.lock();
        if !agents.contains_key(&id) {
            match dynamic_spec(&id) {
                Some(spec) => {
                    agents.insert(id.clone(), spec);
                }
                None => {
                    return AuthResult::Blocked(format!(
                        "DENY_BY_DEFAULT: agent_id '{}' is not registered.",
                        id
                    ));
                }
            }
        }

        let spec = &agents[&id];
        if !spec.allowed_tiles.contains(&tile) {
            return AuthResult::Blocked(format!(
                "LEAST_PRIVILEGE: agent '{}' not authorized for {} gate.",
                id, gate_name
            ));
        }
        AuthResult::Allowed
    }

    /// Primary port of an agent, for event tagging. Defaults to P4.
    pub fn primary_port(&self, agent_id: &str) -> String {
        let agents = self.agents.lock();
        agents
            .get(&agent_id.trim().to_lowercase())
            .and_then(|s| s.ports.first().copied())
            .map(|p| format!("P{}", p))
            .unwrap_or_else(|| "P4".to_string())
    }
}

/// Dynamic-agent fallback. `p<digit>…` gets that port; `swarm_…`/`agent_…`
/// get everything. Anything else stays deny-by-default.
fn dynamic_spec(id: &str) -> Option<AgentSpec> {
    let mut chars = id.chars();
    if chars.next() == Some('p') {
        if let Some(digit) = chars.next().and_then(|c| c.to_digit(10)) {
            if digit < 8 {
                return Some(AgentSpec {
                    display_name: format!("Dynamic Swarm Agent ({})", id),
                    ports: vec![digit as u8],
                    allowed_tiles: ALL_TILES.to_vec(),
                });
            }
        }
    }
    if id.starts_with("swarm_") || id.starts_with("agent_") {
        return Some(AgentSpec {
            display_name: format!("Dynamic Swarm Agent ({})", id),
            ports: (0..8).collect(),
            allowed_tiles: ALL_TILES.to_vec(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_agent_allowed_on_its_tiles() {
        let reg = AgentRegistry::new();
        assert!(matches!(reg.authorize("p0_lidless_legion", 0, "HUNT"), AuthResult::Allowed));
        assert!(matches!(
            reg.authorize("p0_lidless_legion", 1, "INTERVENE"),
            AuthResult::Blocked(_)
        ));
    }

    #[test]
    fn unknown_agent_blocked() {
        let reg = AgentRegistry::new();
        match reg.authorize("intruder", 0, "HUNT") {
            AuthResult::Blocked(reason) => assert!(reason.contains("DENY_BY_DEFAULT")),
            AuthResult::Allowed => panic!("unknown agent must be blocked"),
        }
    }

    #[test]
    fn dynamic_patterns_auto_register() {
        let reg = AgentRegistry::new();
        assert!(matches!(reg.authorize("p3_worker_7", 1, "INTERVENE"), AuthResult::Allowed));
        assert!(matches!(reg.authorize("swarm_alpha", 3, "EMIT"), AuthResult::Allowed));
        assert!(matches!(reg.authorize("agent_xyz", 2, "VERIFY"), AuthResult::Allowed));
        assert_eq!(reg.primary_port("p3_worker_7"), "P3");
    }

    #[test]
    fn empty_agent_id_blocked() {
        let reg = AgentRegistry::new();
        assert!(matches!(reg.authorize("  ", 0, "HUNT"), AuthResult::Blocked(_)));
    }
}
