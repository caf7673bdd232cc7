pub mod ai;
pub mod game;

use serde::Serialize;
use serde_wasm_bindgen::{from_value, Serializer};
use std::str::FromStr;
use wasm_bindgen::prelude::*;

pub use ai::{
    utility, MinimaxAgent, ScoredChild, SearchConfig, SearchDecision, SearchDifficulty,
    UtilityFeatures, LOSS_UTILITY, WIN_UTILITY,
};
pub use game::{
    find_path, ActionError, CombatSnapshot, CombatState, CombatStyle, Direction, Grid, IntegrityError,
    JointAction, JointActions, Position, Roster, Route, Side, StateChild, Transition,
    TransitionEvent, Unit, UnitAction, UnitId, UnitSnapshot,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

// 映射序列化为普通对象，联合行动形如 `{ "4": {...} }`。
fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn to_js_error<E: Serialize + std::fmt::Display>(error: E) -> JsValue {
    to_js(&error).unwrap_or_else(|_| JsValue::from_str(&error.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn search_config(difficulty: Option<&str>, depth: Option<u8>) -> SearchConfig {
    let difficulty = difficulty
        .and_then(|value| SearchDifficulty::from_str(value).ok())
        .unwrap_or(SearchDifficulty::Normal);
    let config = SearchConfig::from_difficulty(difficulty);
    match depth {
        Some(depth) => config.with_depth(depth),
        None => config,
    }
}

#[derive(Serialize)]
struct TransitionResponse {
    events: Vec<TransitionEvent>,
    snapshot: CombatSnapshot,
}

/// 在多次调用之间保存宿主最新的快照与搜索配置。
#[wasm_bindgen]
pub struct MinimaxEngine {
    snapshot: CombatSnapshot,
    config: SearchConfig,
}

impl MinimaxEngine {
    fn root(&self) -> Result<CombatState, JsValue> {
        CombatState::from_snapshot(&self.snapshot).map_err(to_js_error)
    }
}

#[wasm_bindgen]
impl MinimaxEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(
        snapshot_json: Option<String>,
        difficulty: Option<String>,
        depth: Option<u8>,
    ) -> Result<MinimaxEngine, JsValue> {
        let snapshot = if let Some(json) = snapshot_json {
            serde_json::from_str(&json).map_err(serde_to_js_error)?
        } else {
            CombatSnapshot::sample()
        };
        CombatState::from_snapshot(&snapshot).map_err(to_js_error)?;
        Ok(MinimaxEngine {
            snapshot,
            config: search_config(difficulty.as_deref(), depth),
        })
    }

    pub fn snapshot_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.snapshot).map_err(serde_to_js_error)
    }

    pub fn set_snapshot_json(&mut self, json: &str) -> Result<(), JsValue> {
        let snapshot: CombatSnapshot = serde_json::from_str(json).map_err(serde_to_js_error)?;
        CombatState::from_snapshot(&snapshot).map_err(to_js_error)?;
        self.snapshot = snapshot;
        Ok(())
    }

    pub fn depth(&self) -> u8 {
        self.config.depth
    }

    pub fn set_depth(&mut self, depth: u8) {
        self.config = self.config.with_depth(depth);
    }

    pub fn set_pruning(&mut self, pruning: bool) {
        self.config.pruning = pruning;
    }

    pub fn decide_json(&self) -> Result<String, JsValue> {
        let decision = MinimaxAgent::new(self.config).decide(&self.root()?);
        serde_json::to_string(&decision).map_err(serde_to_js_error)
    }

    /// 按搜索顺序列出根节点的子节点及其静态效用与搜索值。
    pub fn children_json(&self) -> Result<String, JsValue> {
        let scored = MinimaxAgent::new(self.config).score_children(&self.root()?);
        serde_json::to_string(&scored).map_err(serde_to_js_error)
    }

    /// 结算受控方的指令并保存结果局面；不合法的指令会被拒绝，快照保持不变。
    pub fn apply_action_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let action: JointAction = serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let transition = self.root()?.apply(&action).map_err(to_js_error)?;
        self.snapshot = transition.state.to_snapshot();
        let response = TransitionResponse {
            events: transition.events,
            snapshot: self.snapshot.clone(),
        };
        serde_json::to_string(&response).map_err(serde_to_js_error)
    }

    pub fn evaluate(&self) -> Result<f64, JsValue> {
        Ok(self.root()?.utility())
    }
}

#[wasm_bindgen(js_name = "createSampleSnapshot")]
pub fn create_sample_snapshot() -> Result<JsValue, JsValue> {
    to_js(&CombatSnapshot::sample())
}

#[wasm_bindgen(js_name = "validateSnapshot")]
pub fn validate_snapshot(snapshot: JsValue) -> Result<(), JsValue> {
    let snapshot: CombatSnapshot = from_value(snapshot).map_err(JsValue::from)?;
    CombatState::from_snapshot(&snapshot).map_err(to_js_error)?;
    Ok(())
}

/// 返回快照网格上两点之间的中间格子（不含两端），不可达时返回 `null`。
#[wasm_bindgen(js_name = "findRoute")]
pub fn find_route(snapshot: JsValue, start: JsValue, goal: JsValue) -> Result<JsValue, JsValue> {
    let snapshot: CombatSnapshot = from_value(snapshot).map_err(JsValue::from)?;
    let start: Position = from_value(start).map_err(JsValue::from)?;
    let goal: Position = from_value(goal).map_err(JsValue::from)?;
    let state = CombatState::from_snapshot(&snapshot).map_err(to_js_error)?;
    let grid = state.grid();
    if let Some(outside) = [start, goal].into_iter().find(|end| !grid.in_bounds(end)) {
        return Err(JsValue::from_str(&format!("{outside} lies outside the grid")));
    }
    to_js(&find_path(grid, start, goal))
}

#[wasm_bindgen(js_name = "computeMinimaxMove")]
pub fn compute_minimax_move(
    snapshot: JsValue,
    difficulty: Option<String>,
    depth: Option<u8>,
) -> Result<JsValue, JsValue> {
    let snapshot: CombatSnapshot = from_value(snapshot).map_err(JsValue::from)?;
    let agent = MinimaxAgent::new(search_config(difficulty.as_deref(), depth));
    let decision = agent.decide_snapshot(&snapshot).map_err(to_js_error)?;
    to_js(&decision)
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_config_falls_back_to_normal() {
        assert_eq!(search_config(None, None), SearchConfig::default());
        assert_eq!(search_config(Some("bogus"), None).depth, 2);
        assert_eq!(search_config(Some("expert"), None).depth, 4);
        assert_eq!(search_config(Some("easy"), Some(3)).depth, 3);
    }

    #[test]
    fn engine_round_trips_through_json() {
        let mut engine = MinimaxEngine::new(None, Some("easy".into()), None).expect("sample engine");
        assert_eq!(engine.depth(), 1);

        let decision: serde_json::Value =
            serde_json::from_str(&engine.decide_json().expect("decision")).expect("json");
        assert!(decision["action"].is_object());

        let children: serde_json::Value =
            serde_json::from_str(&engine.children_json().expect("children")).expect("json");
        assert_eq!(
            children.as_array().map(Vec::len),
            decision["children"].as_u64().map(|n| n as usize)
        );

        let action = decision["action"].to_string();
        let applied: serde_json::Value =
            serde_json::from_str(&engine.apply_action_json(&action).expect("applied")).expect("json");
        assert_eq!(applied["snapshot"], decision["projected"]);
        assert!(applied["events"].is_array());
    }

    fn crowded_engine() -> MinimaxEngine {
        let snapshot = CombatSnapshot::new(5, 1)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2))
            .with_controlled(UnitSnapshot::new(2, Position::new(1, 0), 10, 2))
            .with_opponent(UnitSnapshot::new(3, Position::new(4, 0), 4, 1));
        let json = serde_json::to_string(&snapshot).expect("serialize");
        MinimaxEngine::new(Some(json), None, None).expect("valid engine")
    }

    #[test]
    fn engine_root_refuses_illegal_orders() {
        let root = crowded_engine().root().expect("root");

        for order in [
            r#"{"1":{"type":"Move","direction":"east"}}"#,
            r#"{"1":{"type":"Move","direction":"west"}}"#,
            r#"{"3":{"type":"Move","direction":"west"}}"#,
        ] {
            let action: JointAction = serde_json::from_str(order).expect("action");
            assert!(root.apply(&action).is_err(), "{order} should be refused");
        }
    }

    #[test]
    fn legal_orders_advance_the_snapshot() {
        let mut engine = crowded_engine();

        let applied = engine
            .apply_action_json(r#"{"2":{"type":"Move","direction":"east"}}"#)
            .expect("legal move");
        let applied: serde_json::Value = serde_json::from_str(&applied).expect("json");

        assert_eq!(applied["events"][0]["type"], "Moved");
        assert_eq!(applied["snapshot"]["controlled"][1]["position"]["x"], 2);
        assert!(engine.root().is_ok());
        assert!(engine.evaluate().is_ok());
    }
}
