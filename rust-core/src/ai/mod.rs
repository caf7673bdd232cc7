//! 战斗搜索树上的 AI：静态效用评估与带 alpha-beta 剪枝的极小化极大搜索。

pub mod evaluation;
pub mod minimax;

pub use evaluation::{utility, UtilityFeatures, LOSS_UTILITY, WIN_UTILITY};
pub use minimax::{MinimaxAgent, ScoredChild, SearchConfig, SearchDecision, SearchDifficulty};
