//! Dependency resolver
//!
//! Orders a catalog with Kahn's algorithm. Ready resources are taken in
//! declaration order (a min-heap on node index), so resources with no
//! constraint between them keep the order they were declared in.

use crate::catalog::Catalog;
use crate::error::CycleError;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// A total order over a catalog, plus the adjacency it was built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Node indices in application order
    pub order: Vec<usize>,
    /// Direct predecessors of each node, sorted
    pub predecessors: Vec<Vec<usize>>,
    /// Direct successors of each node, sorted
    pub successors: Vec<Vec<usize>>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every node reachable from `index`, excluding `index` itself
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.successors.len()];
        let mut queue: VecDeque<usize> = self.successors[index].iter().copied().collect();
        let mut found = Vec::new();

        while let Some(next) = queue.pop_front() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            found.push(next);
            queue.extend(self.successors[next].iter().copied());
        }

        found.sort_unstable();
        found
    }

    /// Position of each node in `order`
    pub fn positions(&self) -> Vec<usize> {
        let mut positions = vec![0; self.order.len()];
        for (position, &index) in self.order.iter().enumerate() {
            positions[index] = position;
        }
        positions
    }
}

/// Order the catalog, or report one cycle if it is not a DAG
pub fn resolve(catalog: &Catalog) -> Result<Plan, CycleError> {
    let count = catalog.len();
    let mut predecessors = vec![Vec::new(); count];
    let mut successors = vec![Vec::new(); count];

    for edge in catalog.edges() {
        successors[edge.from].push(edge.to);
        predecessors[edge.to].push(edge.from);
    }
    for list in predecessors.iter_mut().chain(successors.iter_mut()) {
        list.sort_unstable();
        list.dedup();
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &next in &successors[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < count {
        let members = find_cycle(&predecessors, &in_degree)
            .into_iter()
            .map(|index| catalog.node(index).id.clone())
            .collect();
        return Err(CycleError { members });
    }

    log::debug!("Resolved order for {count} resources");
    Ok(Plan {
        order,
        predecessors,
        successors,
    })
}

/// Extract one cycle from the nodes Kahn's algorithm could not order
///
/// Every leftover node has a leftover predecessor, so walking predecessors
/// from any leftover node must revisit a node.
fn find_cycle(predecessors: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let leftover = |index: usize| in_degree[index] > 0;
    let Some(start) = (0..in_degree.len()).find(|&index| leftover(index)) else {
        return Vec::new();
    };

    let mut walk = vec![start];
    let mut current = start;
    loop {
        let Some(&previous) = predecessors[current].iter().find(|&&p| leftover(p)) else {
            return walk;
        };
        if let Some(pos) = walk.iter().position(|&seen| seen == previous) {
            let mut cycle = walk.split_off(pos);
            // Walked against edge direction
            cycle.reverse();
            let smallest = cycle
                .iter()
                .enumerate()
                .min_by_key(|(_, index)| **index)
                .map_or(0, |(pos, _)| pos);
            cycle.rotate_left(smallest);
            return cycle;
        }
        walk.push(previous);
        current = previous;
    }
}
