use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::evaluation::utility;
use crate::game::{CombatSnapshot, CombatState, IntegrityError, JointAction, StateChild};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDifficulty {
    Easy,
    Normal,
    Hard,
    Expert,
}

impl FromStr for SearchDifficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(SearchDifficulty::Easy),
            "normal" | "medium" => Ok(SearchDifficulty::Normal),
            "hard" => Ok(SearchDifficulty::Hard),
            "expert" | "extreme" => Ok(SearchDifficulty::Expert),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchConfig {
    /// 搜索的层数。根节点总会展开，因此 0 等同于 1。
    pub depth: u8,
    /// 是否启用 alpha-beta 剪枝；关闭后以相同的排序与平局规则做完整极小化极大搜索。
    #[serde(default = "default_pruning")]
    pub pruning: bool,
}

fn default_pruning() -> bool {
    true
}

impl SearchConfig {
    pub fn from_difficulty(difficulty: SearchDifficulty) -> Self {
        let depth = match difficulty {
            SearchDifficulty::Easy => 1,
            SearchDifficulty::Normal => 2,
            SearchDifficulty::Hard => 3,
            SearchDifficulty::Expert => 4,
        };
        Self {
            depth,
            pruning: true,
        }
    }

    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn exhaustive(mut self) -> Self {
        self.pruning = false;
        self
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig::from_difficulty(SearchDifficulty::Normal)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchDecision {
    /// 行动方的指令；没有合法联合行动时为 `None`。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<JointAction>,
    pub evaluation: f64,
    pub depth_reached: u8,
    pub nodes: u64,
    pub cutoffs: u64,
    /// 根节点考察过的联合行动数。
    pub children: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected: Option<CombatSnapshot>,
    #[serde(skip)]
    pub state: Option<CombatState>,
}

/// 根节点的一个子节点，附带静态效用与搜索值。
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChild {
    pub action: JointAction,
    pub utility: f64,
    pub value: f64,
}

#[derive(Debug, Default)]
struct SearchStats {
    nodes: u64,
    depth_reached: u8,
    cutoffs: u64,
}

impl SearchStats {
    fn visit(&mut self, ply: u8) {
        self.nodes += 1;
        self.depth_reached = self.depth_reached.max(ply);
    }
}

/// `state` 的子节点及其静态效用，按行动方视角从优到劣排列。
/// 排序稳定，同分时保持生成顺序。
fn ordered_children(state: &CombatState) -> Vec<(f64, StateChild)> {
    let mut scored: Vec<(f64, StateChild)> = state
        .children()
        .into_iter()
        .map(|child| (utility(&child.state), child))
        .collect();
    if state.active_side().is_maximizing() {
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    } else {
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    scored
}

pub struct MinimaxAgent {
    config: SearchConfig,
}

impl MinimaxAgent {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SearchConfig {
        self.config
    }

    pub fn decide_snapshot(&self, snapshot: &CombatSnapshot) -> Result<SearchDecision, IntegrityError> {
        let root = CombatState::from_snapshot(snapshot)?;
        Ok(self.decide(&root))
    }

    /// 为 `root` 的行动方选择联合行动。
    ///
    /// 搜索值相同的子节点按各自静态效用区分：后出现的子节点只有在对行动方严格更优时
    /// 才会取代当前最优。
    pub fn decide(&self, root: &CombatState) -> SearchDecision {
        let mut stats = SearchStats::default();
        stats.visit(0);

        let children = ordered_children(root);
        let considered = children.len();
        if children.is_empty() {
            let evaluation = utility(root);
            debug!(evaluation, "no legal joint action at root");
            return SearchDecision {
                action: None,
                evaluation,
                depth_reached: 0,
                nodes: stats.nodes,
                cutoffs: 0,
                children: 0,
                projected: None,
                state: None,
            };
        }

        let remaining = self.config.depth.saturating_sub(1);
        let maximizing = root.active_side().is_maximizing();
        let mut alpha = f64::NEG_INFINITY;
        let mut beta = f64::INFINITY;
        let mut best: Option<(f64, f64, StateChild)> = None;

        for (shallow, child) in children {
            let mut value = self.search(&child.state, remaining, alpha, beta, 1, &mut stats);

            let replace = match &best {
                None => true,
                Some((best_value, best_shallow, _)) => {
                    if self.config.pruning && value == *best_value {
                        // 与当前最优相等的边界值可能掩盖更差的精确值。
                        value = self.search(
                            &child.state,
                            remaining,
                            f64::NEG_INFINITY,
                            f64::INFINITY,
                            1,
                            &mut stats,
                        );
                    }
                    if value == *best_value {
                        if maximizing {
                            shallow > *best_shallow
                        } else {
                            shallow < *best_shallow
                        }
                    } else if maximizing {
                        value > *best_value
                    } else {
                        value < *best_value
                    }
                }
            };

            if maximizing {
                alpha = alpha.max(value);
            } else {
                beta = beta.min(value);
            }
            if replace {
                best = Some((value, shallow, child));
            }
        }

        let Some((evaluation, _, chosen)) = best else {
            return SearchDecision {
                action: None,
                evaluation: utility(root),
                depth_reached: stats.depth_reached,
                nodes: stats.nodes,
                cutoffs: stats.cutoffs,
                children: considered,
                projected: None,
                state: None,
            };
        };

        debug!(
            depth = self.config.depth,
            pruning = self.config.pruning,
            nodes = stats.nodes,
            cutoffs = stats.cutoffs,
            children = considered,
            evaluation,
            "minimax decision"
        );

        SearchDecision {
            action: Some(chosen.action),
            evaluation,
            depth_reached: stats.depth_reached,
            nodes: stats.nodes,
            cutoffs: stats.cutoffs,
            children: considered,
            projected: Some(chosen.state.to_snapshot()),
            state: Some(chosen.state),
        }
    }

    /// 按搜索顺序列出根节点的每个子节点及其在配置深度下的精确值。
    pub fn score_children(&self, root: &CombatState) -> Vec<ScoredChild> {
        let remaining = self.config.depth.saturating_sub(1);
        let mut stats = SearchStats::default();
        ordered_children(root)
            .into_iter()
            .map(|(utility, child)| {
                let value = self.search(
                    &child.state,
                    remaining,
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                    1,
                    &mut stats,
                );
                ScoredChild {
                    action: child.action,
                    utility,
                    value,
                }
            })
            .collect()
    }

    fn search(
        &self,
        state: &CombatState,
        depth_remaining: u8,
        mut alpha: f64,
        mut beta: f64,
        ply: u8,
        stats: &mut SearchStats,
    ) -> f64 {
        stats.visit(ply);

        if depth_remaining == 0 {
            return utility(state);
        }

        let children = ordered_children(state);
        if children.is_empty() {
            return utility(state);
        }

        if state.active_side().is_maximizing() {
            let mut value = f64::NEG_INFINITY;
            for (_, child) in children {
                let score = self.search(
                    &child.state,
                    depth_remaining - 1,
                    alpha,
                    beta,
                    ply.saturating_add(1),
                    stats,
                );
                value = value.max(score);
                alpha = alpha.max(value);
                if self.config.pruning && beta <= alpha {
                    trace!(ply, alpha, beta, "beta cutoff");
                    stats.cutoffs += 1;
                    break;
                }
            }
            value
        } else {
            let mut value = f64::INFINITY;
            for (_, child) in children {
                let score = self.search(
                    &child.state,
                    depth_remaining - 1,
                    alpha,
                    beta,
                    ply.saturating_add(1),
                    stats,
                );
                value = value.min(score);
                beta = beta.min(value);
                if self.config.pruning && beta <= alpha {
                    trace!(ply, alpha, beta, "alpha cutoff");
                    stats.cutoffs += 1;
                    break;
                }
            }
            value
        }
    }
}
