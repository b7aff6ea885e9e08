// HIVE8 — the tactical counterpart to PREY8.
//
// While PREY8 steers at the leverage level, HIVE8 operates at the
// file/line/test level:
//   H — hunt      = P0 OBSERVE + P1 BRIDGE      (locate target + map dependencies)
//   I — intervene = P2 SHAPE   + P4 DISRUPT     (write code + break existing structure)
//   V — verify    = P5 IMMUNIZE + P6 ASSIMILATE (run tests + learn from failures)
//   E — emit      = P3 INJECT  + P7 NAVIGATE    (deliver payload + steer back)
//
// Verify carries the test gate — FAILED blocks emit until a pass.

use crate::gates::engine::{MachineProfile, PhaseWords, TileMachine, TileResponse, TileSpec};
use crate::paths::Paths;
use crate::store::Store;

pub const HIVE8_PROFILE: MachineProfile = MachineProfile {
    machine: "hive8",
    tiles: [
        TileSpec {
            name: "hunt",
            gate_name: "HUNT",
            status_word: "HUNTED",
            token_field: "hunt_nonce",
            instruction: "TILE 0 PLACED [P0+P1 GATE PASSED]. You MUST call intervene with this nonce.",
        },
        TileSpec {
            name: "intervene",
            gate_name: "INTERVENE",
            status_word: "INTERVENED",
            token_field: "intervene_token",
            instruction: "TILE 1 PLACED [P2+P4 GATE PASSED]. You MUST call verify with this token.",
        },
        TileSpec {
            name: "verify",
            gate_name: "VERIFY",
            status_word: "VERIFIED",
            token_field: "verify_token",
            instruction: "TILE 2 PLACED [P5+P6 GATE PASSED]. You MUST call emit with this token.",
        },
        TileSpec {
            name: "emit",
            gate_name: "EMIT",
            status_word: "EMITTED",
            token_field: "emit_receipt",
            instruction: "MOSAIC COMPLETE [ALL GATES PASSED]. Tactical payload delivered. Return to the strategic loop.",
        },
    ],
    status_tile: 2,
    phases: PhaseWords {
        idle: "idle",
        opened: "hunted",
        worked: "intervened",
        checked: "verified",
        test_failed: "verifying",
        complete: "emitted",
    },
    model_id: "gemini-3.1-pro-preview",
};

/// Typed wrapper over the generic engine with HIVE8 field names.
pub struct Hive8 {
    machine: TileMachine,
}

impl Default for Hive8 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hive8 {
    pub fn new() -> Self {
        Hive8 { machine: TileMachine::new(HIVE8_PROFILE) }
    }

    pub fn machine(&self) -> &TileMachine {
        &self.machine
    }

    pub fn hunt(
        &self,
        store: &Store,
        paths: &Paths,
        agent_id: &str,
        tactical_objective: &str,
        target_files: &str,
    ) -> TileResponse {
        self.machine.advance(
            store,
            paths,
            agent_id,
            0,
            None,
            &[
                ("tactical_objective", tactical_objective),
                ("target_files", target_files),
            ],
            None,
        )
    }

    pub fn intervene(
        &self,
        store: &Store,
        paths: &Paths,
        agent_id: &str,
        hunt_nonce: &str,
        files_modified: &str,
        diff_summary: &str,
    ) -> TileResponse {
        self.machine.advance(
            store,
            paths,
            agent_id,
            1,
            Some(hunt_nonce),
            &[
                ("files_modified", files_modified),
                ("diff_summary", diff_summary),
            ],
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        &self,
        store: &Store,
        paths: &Paths,
        agent_id: &str,
        intervene_token: &str,
        test_command: &str,
        test_output: &str,
        status: &str,
    ) -> TileResponse {
        self.machine.advance(
            store,
            paths,
            agent_id,
            2,
            Some(intervene_token),
            &[("test_command", test_command), ("test_output", test_output)],
            Some(status),
        )
    }

    pub fn emit(
        &self,
        store: &Store,
        paths: &Paths,
        agent_id: &str,
        verify_token: &str,
        delivery_manifest: &str,
        tactical_yield_summary: &str,
    ) -> TileResponse {
        self.machine.advance(
            store,
            paths,
            agent_id,
            3,
            Some(verify_token),
            &[
                ("delivery_manifest", delivery_manifest),
                ("tactical_yield_summary", tactical_yield_summary),
            ],
            None,
        )
    }
}
