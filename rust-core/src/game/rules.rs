use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, HashSet};
use thiserror::Error;

use super::grid::{Direction, Position};
use super::state::{CombatState, Side, Unit, UnitId};

/// 单个单位在一层中的行动。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type")]
pub enum UnitAction {
    Move { direction: Direction },
    Attack { target: UnitId },
}

/// 行动方的同步指令，按单位 id 索引。
///
/// 未出现在映射中的单位原地不动。效果按 id 升序结算。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct JointAction(BTreeMap<UnitId, UnitAction>);

impl JointAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, unit_id: UnitId, action: UnitAction) -> Self {
        self.0.insert(unit_id, action);
        self
    }

    pub fn insert(&mut self, unit_id: UnitId, action: UnitAction) -> Option<UnitAction> {
        self.0.insert(unit_id, action)
    }

    pub fn get(&self, unit_id: UnitId) -> Option<&UnitAction> {
        self.0.get(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, UnitId, UnitAction> {
        self.0.iter()
    }
}

impl FromIterator<(UnitId, UnitAction)> for JointAction {
    fn from_iter<I: IntoIterator<Item = (UnitId, UnitAction)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a JointAction {
    type Item = (&'a UnitId, &'a UnitAction);
    type IntoIter = btree_map::Iter<'a, UnitId, UnitAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 外部提交的联合行动不合法的原因。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum ActionError {
    #[error("unit {unit_id} is not a live unit of the side to act")]
    UnknownUnit { unit_id: UnitId },
    #[error("unit {unit_id} cannot perform {action:?}")]
    IllegalAction { unit_id: UnitId, action: UnitAction },
    #[error("moves collide on a single cell")]
    ConflictingMoves,
}

/// 联合行动及其产生的节点。
#[derive(Debug, Clone)]
pub struct StateChild {
    pub action: JointAction,
    pub state: CombatState,
}

/// 逐个产生各单位选择的笛卡尔积。
///
/// 没有合法行动的单位被略过；所有单位都没有时不产生任何联合行动。
#[derive(Debug, Clone)]
pub struct JointActions {
    choices: Vec<(UnitId, Vec<UnitAction>)>,
    cursor: Option<Vec<usize>>,
}

impl JointActions {
    pub fn new(choices: Vec<(UnitId, Vec<UnitAction>)>) -> Self {
        let choices: Vec<_> = choices
            .into_iter()
            .filter(|(_, actions)| !actions.is_empty())
            .collect();
        let cursor = (!choices.is_empty()).then(|| vec![0; choices.len()]);
        Self { choices, cursor }
    }

    /// 冲突过滤前的完整积大小。
    pub fn combinations(&self) -> usize {
        if self.choices.is_empty() {
            return 0;
        }
        self.choices
            .iter()
            .fold(1usize, |total, (_, actions)| total.saturating_mul(actions.len()))
    }
}

impl Iterator for JointActions {
    type Item = JointAction;

    fn next(&mut self) -> Option<JointAction> {
        let cursor = self.cursor.as_mut()?;
        let action = self
            .choices
            .iter()
            .zip(cursor.iter())
            .map(|((unit_id, actions), &index)| (*unit_id, actions[index]))
            .collect();
        if !advance(cursor, &self.choices) {
            self.cursor = None;
        }
        Some(action)
    }
}

/// 按里程表方式推进选择下标，全部组合产生完毕后返回 false。
fn advance(cursor: &mut [usize], choices: &[(UnitId, Vec<UnitAction>)]) -> bool {
    for slot in (0..cursor.len()).rev() {
        cursor[slot] += 1;
        if cursor[slot] < choices[slot].1.len() {
            return true;
        }
        cursor[slot] = 0;
    }
    false
}

impl CombatState {
    /// 通往边界内、无障碍且未被占据格子的方向。
    pub fn open_moves(&self, from: Position) -> impl Iterator<Item = Direction> + '_ {
        Direction::CARDINAL.into_iter().filter(move |direction| {
            let to = from.step(*direction);
            self.grid().is_passable(&to) && !self.is_occupied(&to)
        })
    }

    /// 先列移动，再列当前位置能攻击到的每个对手单位。
    pub fn legal_actions(&self, unit: &Unit) -> Vec<UnitAction> {
        let mut actions: Vec<UnitAction> = self
            .open_moves(unit.position)
            .map(|direction| UnitAction::Move { direction })
            .collect();

        let style = self.roster(unit.side).style();
        actions.extend(
            self.roster(unit.side.opposite())
                .iter()
                .filter(|target| style.can_strike(&unit.position, &target.position))
                .map(|target| UnitAction::Attack { target: target.id }),
        );
        actions
    }

    /// `side` 每个存活单位的可选行动，按列表顺序。
    pub fn unit_choices(&self, side: Side) -> Vec<(UnitId, Vec<UnitAction>)> {
        self.roster(side)
            .iter()
            .map(|unit| (unit.id, self.legal_actions(unit)))
            .collect()
    }

    /// 按需产生行动方无冲突的联合行动。
    pub fn joint_actions(&self) -> impl Iterator<Item = JointAction> + '_ {
        JointActions::new(self.unit_choices(self.active_side()))
            .filter(move |action| !self.moves_conflict(action))
    }

    /// 每个无冲突联合行动及其通向的节点。
    pub fn children(&self) -> Vec<StateChild> {
        self.joint_actions()
            .map(|action| {
                let state = self.successor(&action);
                StateChild { action, state }
            })
            .collect()
    }

    /// 校验外部提交的联合行动：每个单位都须属于行动方且行动在其合法集合内，
    /// 且移动之间没有冲突。
    pub fn check_action(&self, action: &JointAction) -> Result<(), ActionError> {
        let side = self.active_side();
        for (&unit_id, unit_action) in action {
            let Some(unit) = self.roster(side).get(unit_id) else {
                return Err(ActionError::UnknownUnit { unit_id });
            };
            if !self.legal_actions(unit).contains(unit_action) {
                return Err(ActionError::IllegalAction {
                    unit_id,
                    action: *unit_action,
                });
            }
        }
        if self.moves_conflict(action) {
            return Err(ActionError::ConflictingMoves);
        }
        Ok(())
    }

    /// 两个移动进入同一格，或移动进入本层开始前已被占据的格子，即为冲突。
    pub fn moves_conflict(&self, action: &JointAction) -> bool {
        let mut destinations = HashSet::new();
        for (unit_id, unit_action) in action {
            let UnitAction::Move { direction } = unit_action else {
                continue;
            };
            let Some(unit) = self.unit(*unit_id) else {
                continue;
            };
            let destination = unit.position.step(*direction);
            if !destinations.insert(destination) || self.is_occupied(&destination) {
                return true;
            }
        }
        false
    }
}
