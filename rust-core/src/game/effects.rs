use serde::{Deserialize, Serialize};

use super::grid::Position;
use super::rules::{ActionError, JointAction, UnitAction};
use super::state::{CombatState, UnitId};

/// 结算联合行动时发生的事件。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TransitionEvent {
    Moved {
        unit_id: UnitId,
        from: Position,
        to: Position,
    },
    Damaged {
        attacker: UnitId,
        target: UnitId,
        amount: u32,
        remaining: u32,
    },
    Killed {
        unit_id: UnitId,
    },
    /// 目标已不存在，通常是同一层中先前已被击杀。
    AttackSkipped {
        attacker: UnitId,
        target: UnitId,
    },
    /// 行动单位不是行动方的存活单位。
    ActionSkipped {
        unit_id: UnitId,
    },
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: CombatState,
    pub events: Vec<TransitionEvent>,
}

impl CombatState {
    /// 为行动方结算 `action` 并返回下一个节点。
    pub fn successor(&self, action: &JointAction) -> CombatState {
        self.resolve(action).state
    }

    /// 校验外部提交的行动后再结算，保证结果状态仍满足所有不变量。
    pub fn apply(&self, action: &JointAction) -> Result<Transition, ActionError> {
        self.check_action(action)?;
        Ok(self.resolve(action))
    }

    /// 与 [`CombatState::successor`] 相同，同时记录每个效果。
    ///
    /// 指令按单位 id 升序结算。移动不再重新校验，来自
    /// [`CombatState::joint_actions`] 的联合行动总是合法的；外部指令请使用
    /// [`CombatState::apply`]。
    pub fn resolve(&self, action: &JointAction) -> Transition {
        let actor_side = self.active_side();
        let target_side = actor_side.opposite();
        let mut next = self.next_ply();
        let mut events = Vec::new();

        for (&unit_id, unit_action) in action {
            let Some(actor) = next.roster(actor_side).get(unit_id) else {
                events.push(TransitionEvent::ActionSkipped { unit_id });
                continue;
            };
            let (position, power) = (actor.position, actor.attack);

            match *unit_action {
                UnitAction::Move { direction } => {
                    let to = position.step(direction);
                    if let Some(from) = next.relocate(actor_side, unit_id, to) {
                        events.push(TransitionEvent::Moved { unit_id, from, to });
                    }
                }
                UnitAction::Attack { target } => {
                    let Some(victim) = next.roster_mut(target_side).get_mut(target) else {
                        events.push(TransitionEvent::AttackSkipped {
                            attacker: unit_id,
                            target,
                        });
                        continue;
                    };
                    let amount = power.min(victim.hp);
                    victim.hp -= amount;
                    let remaining = victim.hp;
                    events.push(TransitionEvent::Damaged {
                        attacker: unit_id,
                        target,
                        amount,
                        remaining,
                    });
                    if remaining == 0 {
                        next.remove_unit(target_side, target);
                        events.push(TransitionEvent::Killed { unit_id: target });
                    }
                }
            }
        }

        Transition {
            state: next,
            events,
        }
    }
}
