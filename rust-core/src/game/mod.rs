//! 战斗核心逻辑模块（网格、单位、联合行动与状态转移）。

pub mod effects;
pub mod grid;
pub mod pathfinding;
pub mod rules;
pub mod state;

pub use effects::{Transition, TransitionEvent};
pub use grid::{Direction, Grid, Position};
pub use pathfinding::find_path;
pub use rules::{ActionError, JointAction, JointActions, StateChild, UnitAction};
pub use state::{
    CombatSnapshot,
    CombatState,
    CombatStyle,
    IntegrityError,
    Roster,
    Route,
    Side,
    Unit,
    UnitId,
    UnitSnapshot,
};
