//! 战斗节点的静态效用，以受控方视角计算。

use serde::{Deserialize, Serialize};

use crate::game::{CombatState, Side};

/// 对手全灭时返回，高于任何其他分数。
pub const WIN_UTILITY: f64 = f64::MAX;
/// 对手尚存而受控方全灭时返回。
pub const LOSS_UTILITY: f64 = f64::MIN;

#[derive(Debug, Clone, Copy)]
struct FeatureWeights {
    route_deficit: f64,
    enemy_hp: f64,
    enemy_units: f64,
    own_hp: f64,
    own_units: f64,
    enemy_mobility: f64,
}

const WEIGHTS: FeatureWeights = FeatureWeights {
    route_deficit: -10.0,
    enemy_hp: -20.0,
    enemy_units: -20.0,
    own_hp: 3.0,
    own_units: 3.0,
    enemy_mobility: -7.0,
};

/// 加权前的效用原始特征。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UtilityFeatures {
    /// 受控单位与其路线在当前层期望路点之间的平均曼哈顿距离。
    pub route_deficit: f64,
    pub enemy_hp: u64,
    pub enemy_units: usize,
    pub own_hp: u64,
    pub own_units: usize,
    /// 每个对手单位四周可走格子的平均数。
    pub enemy_mobility: f64,
}

impl UtilityFeatures {
    pub fn of(state: &CombatState) -> Self {
        let own = state.roster(Side::Controlled);
        let enemy = state.roster(Side::Opponent);
        let ply = state.depth() as usize;

        let route_total: i32 = own
            .iter()
            .filter_map(|unit| {
                let route = state.route(unit.id);
                let waypoint = route.get(ply.min(route.len().checked_sub(1)?))?;
                Some(unit.position.manhattan(waypoint))
            })
            .sum();
        let mobility_total: usize = enemy
            .iter()
            .map(|unit| state.open_moves(unit.position).count())
            .sum();

        Self {
            route_deficit: mean(route_total as f64, own.len()),
            enemy_hp: enemy.total_hp(),
            enemy_units: enemy.len(),
            own_hp: own.total_hp(),
            own_units: own.len(),
            enemy_mobility: mean(mobility_total as f64, enemy.len()),
        }
    }

    pub fn weighted(&self) -> f64 {
        self.route_deficit * WEIGHTS.route_deficit
            + self.enemy_hp as f64 * WEIGHTS.enemy_hp
            + self.enemy_units as f64 * WEIGHTS.enemy_units
            + self.own_hp as f64 * WEIGHTS.own_hp
            + self.own_units as f64 * WEIGHTS.own_units
            + self.enemy_mobility * WEIGHTS.enemy_mobility
    }
}

fn mean(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

pub fn utility(state: &CombatState) -> f64 {
    let enemy = state.roster(Side::Opponent);
    if enemy.is_empty() || enemy.total_hp() == 0 {
        return WIN_UTILITY;
    }
    if state.roster(Side::Controlled).is_empty() {
        return LOSS_UTILITY;
    }
    UtilityFeatures::of(state).weighted()
}

impl CombatState {
    pub fn utility(&self) -> f64 {
        utility(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{CombatSnapshot, Direction, JointAction, Position, UnitAction, UnitSnapshot};

    fn corridor() -> CombatState {
        let snapshot = CombatSnapshot::new(5, 1)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(3, 0), 4, 1));
        CombatState::from_snapshot(&snapshot).expect("valid snapshot")
    }

    #[test]
    fn weighted_features_at_root() {
        let root = corridor();
        let features = UtilityFeatures::of(&root);

        assert_eq!(features.route_deficit, 0.0);
        assert_eq!(features.enemy_mobility, 2.0);
        // -20*4 - 20*1 + 3*10 + 3*1 - 7*2
        assert_eq!(root.utility(), -81.0);
    }

    #[test]
    fn falling_behind_the_route_costs_utility() {
        let root = corridor();
        let advanced = root.successor(&JointAction::new().with(
            1,
            UnitAction::Move {
                direction: Direction::East,
            },
        ));
        let idle = root.successor(&JointAction::new());

        assert_eq!(advanced.utility(), -81.0);
        assert_eq!(idle.utility(), -91.0);
    }

    #[test]
    fn route_waypoint_clamps_to_last_cell() {
        let root = corridor();
        let mut state = root.clone();
        for _ in 0..6 {
            state = state.successor(&JointAction::new());
        }

        // Route is [(0,0), (1,0), (2,0)]; the unit never left (0,0).
        assert_eq!(UtilityFeatures::of(&state).route_deficit, 2.0);
    }

    #[test]
    fn moving_off_an_adjacent_start_costs_route_progress() {
        let snapshot = CombatSnapshot::new(4, 3)
            .with_controlled(UnitSnapshot::new(1, Position::new(1, 1), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(2, 1), 4, 1));
        let root = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        let retreated = root.successor(&JointAction::new().with(
            1,
            UnitAction::Move {
                direction: Direction::West,
            },
        ));

        assert_eq!(UtilityFeatures::of(&root).route_deficit, 0.0);
        assert_eq!(UtilityFeatures::of(&retreated).route_deficit, 1.0);
    }

    #[test]
    fn huge_enemy_hp_is_not_mistaken_for_a_win() {
        let snapshot = CombatSnapshot::new(6, 6)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(5, 5), u32::MAX, 1))
            .with_opponent(UnitSnapshot::new(3, Position::new(5, 0), 2, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        let features = UtilityFeatures::of(&state);
        assert_eq!(features.enemy_hp, u64::from(u32::MAX) + 2);
        assert!(state.utility() < 0.0);
        assert!(state.utility() > LOSS_UTILITY);
    }

    #[test]
    fn unreachable_route_contributes_nothing() {
        let snapshot = CombatSnapshot::new(5, 3)
            .with_obstacles((0..3).map(|y| Position::new(2, y)))
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 1), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(4, 1), 4, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        assert_eq!(UtilityFeatures::of(&state.successor(&JointAction::new())).route_deficit, 0.0);
    }

    #[test]
    fn empty_opponent_roster_is_a_win() {
        let lonely = CombatSnapshot::new(3, 3)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2));
        let state = CombatState::from_snapshot(&lonely).expect("valid snapshot");
        assert_eq!(state.utility(), WIN_UTILITY);

        let nobody = CombatState::from_snapshot(&CombatSnapshot::new(3, 3)).expect("valid");
        assert_eq!(nobody.utility(), WIN_UTILITY);
    }

    #[test]
    fn wiped_out_controlled_side_is_a_loss() {
        let doomed = CombatSnapshot::new(3, 3)
            .with_opponent(UnitSnapshot::new(2, Position::new(2, 2), 4, 1));
        let state = CombatState::from_snapshot(&doomed).expect("valid snapshot");

        assert_eq!(state.utility(), LOSS_UTILITY);
        assert!(corridor().utility() > LOSS_UTILITY);
        assert!(corridor().utility() < WIN_UTILITY);
    }
}
