use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

use super::grid::{Grid, Position};
use super::pathfinding::find_path;

/// 单位标识，在整局中对双方都唯一。
pub type UnitId = u32;
/// 受控单位的参考路线：起点格子，随后是通往最近初始对手的中间格子。
pub type Route = Vec<Position>;

pub const RANGED_MIN_RANGE: i32 = 4;
pub const RANGED_MAX_RANGE: i32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 搜索所代表的一方，最大化效用。
    Controlled,
    Opponent,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Controlled => Side::Opponent,
            Side::Opponent => Side::Controlled,
        }
    }

    pub fn is_maximizing(self) -> bool {
        matches!(self, Side::Controlled)
    }
}

/// 一方单位的攻击方式。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CombatStyle {
    /// 八邻域内的任意目标。
    Melee,
    /// 曼哈顿距离位于 `[min_range, max_range)` 内的目标。
    Ranged { min_range: i32, max_range: i32 },
}

impl CombatStyle {
    pub fn melee() -> Self {
        CombatStyle::Melee
    }

    pub fn ranged() -> Self {
        CombatStyle::Ranged {
            min_range: RANGED_MIN_RANGE,
            max_range: RANGED_MAX_RANGE,
        }
    }

    pub fn can_strike(&self, from: &Position, to: &Position) -> bool {
        match *self {
            CombatStyle::Melee => from.is_adjacent(to),
            CombatStyle::Ranged {
                min_range,
                max_range,
            } => {
                let distance = from.manhattan(to);
                distance >= min_range && distance < max_range
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: UnitId,
    pub side: Side,
    pub position: Position,
    pub hp: u32,
    pub attack: u32,
}

/// 一方存活的单位，保持宿主给出的顺序。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    style: CombatStyle,
    order: Vec<UnitId>,
    units: HashMap<UnitId, Unit>,
}

impl Roster {
    fn new(style: CombatStyle) -> Self {
        Self {
            style,
            order: Vec::new(),
            units: HashMap::new(),
        }
    }

    fn insert(&mut self, unit: Unit) {
        self.order.push(unit.id);
        self.units.insert(unit.id, unit);
    }

    pub fn style(&self) -> CombatStyle {
        self.style
    }

    pub fn ids(&self) -> &[UnitId] {
        &self.order
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> + '_ {
        self.order.iter().filter_map(|id| self.units.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 以 `u64` 求和，单位生命值再大也不会溢出。
    pub fn total_hp(&self) -> u64 {
        self.iter().map(|unit| u64::from(unit.hp)).sum()
    }

    pub(crate) fn remove(&mut self, id: UnitId) -> Option<Unit> {
        self.order.retain(|other| *other != id);
        self.units.remove(&id)
    }
}

/// 决策点上宿主对单个单位的描述。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub position: Position,
    pub hp: u32,
    pub attack: u32,
}

impl UnitSnapshot {
    pub fn new(id: UnitId, position: Position, hp: u32, attack: u32) -> Self {
        Self {
            id,
            position,
            hp,
            attack,
        }
    }
}

/// 宿主请求决策前观察到的完整局面。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CombatSnapshot {
    pub width: i32,
    pub height: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obstacles: Vec<Position>,
    #[serde(default)]
    pub controlled: Vec<UnitSnapshot>,
    #[serde(default)]
    pub opponent: Vec<UnitSnapshot>,
    #[serde(default = "CombatStyle::melee")]
    pub controlled_style: CombatStyle,
    #[serde(default = "CombatStyle::ranged")]
    pub opponent_style: CombatStyle,
}

impl CombatSnapshot {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            obstacles: Vec::new(),
            controlled: Vec::new(),
            opponent: Vec::new(),
            controlled_style: CombatStyle::melee(),
            opponent_style: CombatStyle::ranged(),
        }
    }

    pub fn with_obstacles(mut self, obstacles: impl IntoIterator<Item = Position>) -> Self {
        self.obstacles.extend(obstacles);
        self
    }

    pub fn with_controlled(mut self, unit: UnitSnapshot) -> Self {
        self.controlled.push(unit);
        self
    }

    pub fn with_opponent(mut self, unit: UnitSnapshot) -> Self {
        self.opponent.push(unit);
        self
    }

    /// 示例局面：两名步兵隔着残墙面对两名弓手。
    pub fn sample() -> Self {
        let wall = [1, 2, 5, 6].map(|y| Position::new(5, y));
        CombatSnapshot::new(12, 8)
            .with_obstacles(wall)
            .with_controlled(UnitSnapshot::new(1, Position::new(1, 2), 16, 4))
            .with_controlled(UnitSnapshot::new(2, Position::new(1, 5), 16, 4))
            .with_opponent(UnitSnapshot::new(10, Position::new(10, 1), 10, 2))
            .with_opponent(UnitSnapshot::new(11, Position::new(10, 6), 10, 2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum IntegrityError {
    #[error("grid extents must be positive, got {width}x{height}")]
    EmptyGrid { width: i32, height: i32 },
    #[error("obstacle {position} lies outside the grid")]
    ObstacleOutOfBounds { position: Position },
    #[error("unit {unit_id} at {position} lies outside the grid")]
    OutOfBounds { unit_id: UnitId, position: Position },
    #[error("unit {unit_id} stands on obstacle {position}")]
    ObstacleCell { unit_id: UnitId, position: Position },
    #[error("unit id {unit_id} appears more than once")]
    DuplicateUnitId { unit_id: UnitId },
    #[error("units {first} and {second} share cell {position}")]
    OccupiedCell {
        first: UnitId,
        second: UnitId,
        position: Position,
    },
    #[error("unit {unit_id} has no hit points left")]
    DepletedUnit { unit_id: UnitId },
    #[error("position index disagrees with unit {unit_id}")]
    StaleIndex { unit_id: UnitId },
}

/// 搜索树中的一个节点。
///
/// 单位列表归节点所有；网格与路线在同一快照派生的所有节点间共享，且不会改变。
#[derive(Debug, Clone)]
pub struct CombatState {
    grid: Arc<Grid>,
    routes: Arc<HashMap<UnitId, Route>>,
    controlled: Roster,
    opponent: Roster,
    occupancy: HashMap<Position, UnitId>,
    active: Side,
    depth: u32,
}

impl CombatState {
    /// 构建根节点，受控方先行动。
    pub fn from_snapshot(snapshot: &CombatSnapshot) -> Result<Self, IntegrityError> {
        Self::build(snapshot).inspect_err(|error| warn!(%error, "rejected combat snapshot"))
    }

    fn build(snapshot: &CombatSnapshot) -> Result<Self, IntegrityError> {
        if snapshot.width <= 0 || snapshot.height <= 0 {
            return Err(IntegrityError::EmptyGrid {
                width: snapshot.width,
                height: snapshot.height,
            });
        }

        let grid = Grid::new(
            snapshot.width,
            snapshot.height,
            snapshot.obstacles.iter().copied(),
        );
        if let Some(position) = snapshot
            .obstacles
            .iter()
            .find(|position| !grid.in_bounds(position))
        {
            return Err(IntegrityError::ObstacleOutOfBounds {
                position: *position,
            });
        }

        let mut controlled = Roster::new(snapshot.controlled_style);
        let mut opponent = Roster::new(snapshot.opponent_style);
        let mut occupancy = HashMap::new();
        let mut seen = HashSet::new();

        let listed = snapshot
            .controlled
            .iter()
            .map(|unit| (Side::Controlled, unit))
            .chain(snapshot.opponent.iter().map(|unit| (Side::Opponent, unit)));
        for (side, unit) in listed {
            if !seen.insert(unit.id) {
                return Err(IntegrityError::DuplicateUnitId { unit_id: unit.id });
            }
            if unit.hp == 0 {
                return Err(IntegrityError::DepletedUnit { unit_id: unit.id });
            }
            if !grid.in_bounds(&unit.position) {
                return Err(IntegrityError::OutOfBounds {
                    unit_id: unit.id,
                    position: unit.position,
                });
            }
            if grid.is_obstacle(&unit.position) {
                return Err(IntegrityError::ObstacleCell {
                    unit_id: unit.id,
                    position: unit.position,
                });
            }
            if let Some(first) = occupancy.insert(unit.position, unit.id) {
                return Err(IntegrityError::OccupiedCell {
                    first,
                    second: unit.id,
                    position: unit.position,
                });
            }

            let record = Unit {
                id: unit.id,
                side,
                position: unit.position,
                hp: unit.hp,
                attack: unit.attack,
            };
            match side {
                Side::Controlled => controlled.insert(record),
                Side::Opponent => opponent.insert(record),
            }
        }

        let routes = controlled
            .iter()
            .map(|unit| (unit.id, plan_route(&grid, unit, &opponent)))
            .collect();

        Ok(Self {
            grid: Arc::new(grid),
            routes: Arc::new(routes),
            controlled,
            opponent,
            occupancy,
            active: Side::Controlled,
            depth: 0,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn routes(&self) -> &HashMap<UnitId, Route> {
        &self.routes
    }

    /// 单位的参考路线，无法规划时为空。
    pub fn route(&self, unit_id: UnitId) -> &[Position] {
        self.routes
            .get(&unit_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn roster(&self, side: Side) -> &Roster {
        match side {
            Side::Controlled => &self.controlled,
            Side::Opponent => &self.opponent,
        }
    }

    pub(crate) fn roster_mut(&mut self, side: Side) -> &mut Roster {
        match side {
            Side::Controlled => &mut self.controlled,
            Side::Opponent => &mut self.opponent,
        }
    }

    pub fn controlled(&self) -> &Roster {
        &self.controlled
    }

    pub fn opponent(&self) -> &Roster {
        &self.opponent
    }

    pub fn active_side(&self) -> Side {
        self.active
    }

    /// 自根节点以来已结算的层数。
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.controlled.get(id).or_else(|| self.opponent.get(id))
    }

    pub fn occupant(&self, position: &Position) -> Option<UnitId> {
        self.occupancy.get(position).copied()
    }

    pub fn is_occupied(&self, position: &Position) -> bool {
        self.occupancy.contains_key(position)
    }

    /// 深一层、换另一方行动的节点副本。
    pub(crate) fn next_ply(&self) -> Self {
        let mut next = self.clone();
        next.active = self.active.opposite();
        next.depth = self.depth + 1;
        next
    }

    pub(crate) fn relocate(&mut self, side: Side, unit_id: UnitId, to: Position) -> Option<Position> {
        let unit = self.roster_mut(side).get_mut(unit_id)?;
        let from = unit.position;
        unit.position = to;
        self.occupancy.remove(&from);
        self.occupancy.insert(to, unit_id);
        Some(from)
    }

    pub(crate) fn remove_unit(&mut self, side: Side, unit_id: UnitId) -> Option<Unit> {
        let unit = self.roster_mut(side).remove(unit_id)?;
        self.occupancy.remove(&unit.position);
        Some(unit)
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        let mut cells: HashMap<Position, UnitId> = HashMap::new();
        let mut seen = HashSet::new();
        for unit in self.controlled.iter().chain(self.opponent.iter()) {
            if !seen.insert(unit.id) {
                return Err(IntegrityError::DuplicateUnitId { unit_id: unit.id });
            }
            if unit.hp == 0 {
                return Err(IntegrityError::DepletedUnit { unit_id: unit.id });
            }
            if !self.grid.in_bounds(&unit.position) {
                return Err(IntegrityError::OutOfBounds {
                    unit_id: unit.id,
                    position: unit.position,
                });
            }
            if self.grid.is_obstacle(&unit.position) {
                return Err(IntegrityError::ObstacleCell {
                    unit_id: unit.id,
                    position: unit.position,
                });
            }
            if let Some(first) = cells.insert(unit.position, unit.id) {
                return Err(IntegrityError::OccupiedCell {
                    first,
                    second: unit.id,
                    position: unit.position,
                });
            }
            if self.occupant(&unit.position) != Some(unit.id) {
                return Err(IntegrityError::StaleIndex { unit_id: unit.id });
            }
        }
        if let Some(unit_id) = self
            .occupancy
            .values()
            .find(|unit_id| !seen.contains(*unit_id))
        {
            return Err(IntegrityError::StaleIndex { unit_id: *unit_id });
        }
        Ok(())
    }

    /// 以宿主格式描述该节点，便于展示预测局面或从此处重新搜索。
    pub fn to_snapshot(&self) -> CombatSnapshot {
        let describe = |roster: &Roster| -> Vec<UnitSnapshot> {
            roster
                .iter()
                .map(|unit| UnitSnapshot::new(unit.id, unit.position, unit.hp, unit.attack))
                .collect()
        };
        let mut obstacles: Vec<Position> = self.grid.obstacles().iter().copied().collect();
        obstacles.sort();
        CombatSnapshot {
            width: self.grid.width(),
            height: self.grid.height(),
            obstacles,
            controlled: describe(&self.controlled),
            opponent: describe(&self.opponent),
            controlled_style: self.controlled.style(),
            opponent_style: self.opponent.style(),
        }
    }
}

/// 朝曼哈顿距离最近的对手（并列时取先列出者）规划路线，以起点开头。
/// 没有对手或目标不可达时为空。
fn plan_route(grid: &Grid, unit: &Unit, opponents: &Roster) -> Route {
    let mut nearest: Option<(i32, Position)> = None;
    for target in opponents.iter() {
        let distance = unit.position.manhattan(&target.position);
        if nearest.map_or(true, |(best, _)| distance < best) {
            nearest = Some((distance, target.position));
        }
    }
    let Some((_, goal)) = nearest else {
        return Route::new();
    };

    let Some(path) = find_path(grid, unit.position, goal) else {
        trace!(unit = unit.id, %goal, "no route to nearest opponent");
        return Route::new();
    };
    trace!(unit = unit.id, %goal, steps = path.len(), "planned reference route");

    let mut route = Vec::with_capacity(path.len() + 1);
    route.push(unit.position);
    route.extend(path);
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duel() -> CombatSnapshot {
        CombatSnapshot::new(8, 8)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(6, 0), 4, 1))
    }

    #[test]
    fn sample_snapshot_builds_valid_root() {
        let state = CombatState::from_snapshot(&CombatSnapshot::sample())
            .expect("sample snapshot should be valid");

        assert_eq!(state.active_side(), Side::Controlled);
        assert_eq!(state.depth(), 0);
        assert_eq!(state.controlled().len(), 2);
        assert_eq!(state.opponent().len(), 2);
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn rosters_keep_host_order() {
        let snapshot = CombatSnapshot::new(6, 6)
            .with_controlled(UnitSnapshot::new(9, Position::new(0, 0), 5, 1))
            .with_controlled(UnitSnapshot::new(3, Position::new(0, 1), 5, 1))
            .with_opponent(UnitSnapshot::new(7, Position::new(5, 5), 5, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        assert_eq!(state.controlled().ids(), &[9, 3]);
        assert_eq!(state.controlled().total_hp(), 10);
        assert_eq!(state.unit(7).map(|unit| unit.side), Some(Side::Opponent));
        assert_eq!(state.occupant(&Position::new(0, 1)), Some(3));
    }

    #[test]
    fn route_heads_for_nearest_opponent() {
        let snapshot = duel().with_opponent(UnitSnapshot::new(3, Position::new(0, 7), 4, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        let route = state.route(1);
        assert_eq!(route.first(), Some(&Position::new(0, 0)));
        // (6, 0) is six steps away, (0, 7) seven.
        assert_eq!(route.len(), 6);
        assert!(route
            .last()
            .is_some_and(|cell| cell.is_adjacent(&Position::new(6, 0))));
    }

    #[test]
    fn adjacent_start_keeps_its_own_cell_as_route() {
        let snapshot = CombatSnapshot::new(4, 3)
            .with_controlled(UnitSnapshot::new(1, Position::new(1, 1), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(2, 1), 4, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        assert_eq!(state.route(1), &[Position::new(1, 1)]);
    }

    #[test]
    fn total_hp_survives_huge_units() {
        let snapshot = CombatSnapshot::new(6, 6)
            .with_controlled(UnitSnapshot::new(1, Position::new(0, 0), 10, 2))
            .with_opponent(UnitSnapshot::new(2, Position::new(5, 5), u32::MAX, 1))
            .with_opponent(UnitSnapshot::new(3, Position::new(5, 0), 2, 1));
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        assert_eq!(state.opponent().total_hp(), u64::from(u32::MAX) + 2);
    }

    #[test]
    fn unreachable_opponent_leaves_route_empty() {
        let walls = (0..8).map(|y| Position::new(3, y));
        let snapshot = duel().with_obstacles(walls);
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");

        assert!(state.route(1).is_empty());
        assert!(state.route(2).is_empty());
    }

    #[test]
    fn rejects_malformed_snapshots() {
        let outside = duel().with_controlled(UnitSnapshot::new(5, Position::new(8, 0), 3, 1));
        assert_eq!(
            CombatState::from_snapshot(&outside).unwrap_err(),
            IntegrityError::OutOfBounds {
                unit_id: 5,
                position: Position::new(8, 0)
            }
        );

        let duplicate = duel().with_opponent(UnitSnapshot::new(1, Position::new(4, 4), 3, 1));
        assert_eq!(
            CombatState::from_snapshot(&duplicate).unwrap_err(),
            IntegrityError::DuplicateUnitId { unit_id: 1 }
        );

        let stacked = duel().with_opponent(UnitSnapshot::new(3, Position::new(6, 0), 3, 1));
        assert!(matches!(
            CombatState::from_snapshot(&stacked),
            Err(IntegrityError::OccupiedCell {
                first: 2,
                second: 3,
                ..
            })
        ));

        let walled = duel().with_obstacles([Position::new(0, 0)]);
        assert!(matches!(
            CombatState::from_snapshot(&walled),
            Err(IntegrityError::ObstacleCell { unit_id: 1, .. })
        ));

        let depleted = duel().with_opponent(UnitSnapshot::new(3, Position::new(2, 2), 0, 1));
        assert_eq!(
            CombatState::from_snapshot(&depleted).unwrap_err(),
            IntegrityError::DepletedUnit { unit_id: 3 }
        );

        let flat = CombatSnapshot::new(0, 4);
        assert!(matches!(
            CombatState::from_snapshot(&flat),
            Err(IntegrityError::EmptyGrid { .. })
        ));

        let stray = duel().with_obstacles([Position::new(-1, 3)]);
        assert!(matches!(
            CombatState::from_snapshot(&stray),
            Err(IntegrityError::ObstacleOutOfBounds { .. })
        ));
    }

    #[test]
    fn snapshot_json_defaults_styles() {
        let json = r#"{
            "width": 5,
            "height": 1,
            "controlled": [{ "id": 1, "position": { "x": 0, "y": 0 }, "hp": 10, "attack": 2 }],
            "opponent": [{ "id": 2, "position": { "x": 3, "y": 0 }, "hp": 4, "attack": 1 }]
        }"#;
        let snapshot: CombatSnapshot = serde_json::from_str(json).expect("snapshot should parse");

        assert_eq!(snapshot.controlled_style, CombatStyle::Melee);
        assert_eq!(snapshot.opponent_style, CombatStyle::ranged());
        assert!(snapshot.obstacles.is_empty());
    }

    #[test]
    fn to_snapshot_reproduces_root() {
        let snapshot = CombatSnapshot::sample();
        let state = CombatState::from_snapshot(&snapshot).expect("valid snapshot");
        let mut expected = snapshot.clone();
        expected.obstacles.sort();

        assert_eq!(state.to_snapshot(), expected);
    }

    #[test]
    fn error_messages_name_the_unit() {
        let error = IntegrityError::OutOfBounds {
            unit_id: 4,
            position: Position::new(9, 9),
        };
        assert_eq!(error.to_string(), "unit 4 at (9, 9) lies outside the grid");
    }
}
