//! 网格 A* 寻路，用于预先计算每个受控单位的参考路线。
//!
//! 新生成邻居的代价 = 父节点累计代价 + 1 + 父节点到目标的切比雪夫估计。
//! 估计值沿路径累加而非替换，因此并非教科书式 A*：有障碍时不保证最短路线。
//! 无障碍时路线总是直的。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::grid::{Grid, Position};

#[derive(Debug, Clone)]
struct OpenNode {
    position: Position,
    cost: u64,
    parent: Option<Position>,
    order: u64,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.order == other.order
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    // 按代价的小顶堆，代价相同时按生成顺序出堆。
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug, Clone, Copy)]
struct ClosedNode {
    cost: u64,
    parent: Option<Position>,
}

/// 在八邻域内绕开障碍寻找从 `start` 到 `goal` 的路线，单位不视为障碍。
///
/// 返回的格子不含 `start` 与 `goal`：目标与起点重合或相邻时为空路径。
/// 目标不可达、或任一端点越界/位于障碍上时返回 `None`。
pub fn find_path(grid: &Grid, start: Position, goal: Position) -> Option<Vec<Position>> {
    if !grid.is_passable(&start) || !grid.is_passable(&goal) {
        return None;
    }
    if start == goal {
        return Some(Vec::new());
    }

    let mut open = BinaryHeap::new();
    let mut open_costs: HashMap<Position, u64> = HashMap::new();
    let mut closed: HashMap<Position, ClosedNode> = HashMap::new();
    let mut order: u64 = 0;

    open.push(OpenNode {
        position: start,
        cost: 0,
        parent: None,
        order,
    });
    open_costs.insert(start, 0);

    while let Some(node) = open.pop() {
        // 已被更便宜的副本取代，或已展开。
        if open_costs.get(&node.position) != Some(&node.cost) {
            continue;
        }
        open_costs.remove(&node.position);

        if node.position == goal {
            return Some(trace_back(&closed, node.parent, start));
        }

        closed.insert(
            node.position,
            ClosedNode {
                cost: node.cost,
                parent: node.parent,
            },
        );

        let estimate = node.position.chebyshev(&goal).unsigned_abs() as u64;
        let cost = node.cost + 1 + estimate;

        for neighbor in node.position.neighbors() {
            if let Some(seen) = closed.get_mut(&neighbor) {
                // 记录更低代价，但不重新打开该节点。
                if cost < seen.cost {
                    seen.cost = cost;
                }
                continue;
            }
            if !grid.is_passable(&neighbor) {
                continue;
            }
            if open_costs
                .get(&neighbor)
                .is_some_and(|&existing| existing <= cost)
            {
                continue;
            }

            order += 1;
            open_costs.insert(neighbor, cost);
            open.push(OpenNode {
                position: neighbor,
                cost,
                parent: Some(node.position),
                order,
            });
        }
    }

    None
}

fn trace_back(
    closed: &HashMap<Position, ClosedNode>,
    mut cursor: Option<Position>,
    start: Position,
) -> Vec<Position> {
    let mut path = Vec::new();
    while let Some(cell) = cursor {
        if cell == start {
            break;
        }
        path.push(cell);
        cursor = closed.get(&cell).and_then(|node| node.parent);
    }
    path.reverse();
    path
}
