//! Orders passes so every producer runs before its consumers.

/// Result of scheduling, indexed by declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Passes (by declaration index) in execution order.
    pub order: Vec<usize>,
    /// Execution slot of each declared pass.
    pub final_index: Vec<usize>,
    /// Longest producer chain leading into each declared pass.
    pub distance: Vec<u32>,
}

/// A pass that was reached again while still on the traversal stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CycleAt(pub usize);

/// Depth-first traversal over `successors`, started from every pass in
/// declaration order. A pass receives its slot when it finishes, counting
/// down from the end, so the order is a reverse postorder.
pub fn schedule(successors: &[Vec<usize>]) -> Result<Schedule, CycleAt> {
    let count = successors.len();
    let mut visited = vec![false; count];
    let mut on_stack = vec![false; count];
    let mut final_index = vec![0; count];
    let mut order = vec![0; count];
    let mut next_slot = count;

    // (pass, next successor to visit)
    let mut stack: Vec<(usize, usize)> = Vec::with_capacity(count);

    for root in 0..count {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        on_stack[root] = true;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (pass, cursor) = *top;
            match successors[pass].get(cursor) {
                Some(&next) => {
                    top.1 += 1;
                    if on_stack[next] {
                        return Err(CycleAt(next));
                    }
                    if !visited[next] {
                        visited[next] = true;
                        on_stack[next] = true;
                        stack.push((next, 0));
                    }
                }
                None => {
                    stack.pop();
                    on_stack[pass] = false;
                    next_slot -= 1;
                    final_index[pass] = next_slot;
                    order[next_slot] = pass;
                }
            }
        }
    }

    let distance = longest_paths(successors, &order);

    Ok(Schedule {
        order,
        final_index,
        distance,
    })
}

fn longest_paths(successors: &[Vec<usize>], order: &[usize]) -> Vec<u32> {
    let mut distance = vec![0u32; successors.len()];
    for &pass in order {
        let here = distance[pass] + 1;
        for &next in &successors[pass] {
            distance[next] = distance[next].max(here);
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_keeps_declaration_order() {
        let successors = vec![vec![1], vec![2], vec![]];
        let schedule = schedule(&successors).unwrap();

        assert_eq!(schedule.order, vec![0, 1, 2]);
        assert_eq!(schedule.final_index, vec![0, 1, 2]);
        assert_eq!(schedule.distance, vec![0, 1, 2]);
    }

    #[test]
    fn consumer_declared_first_still_runs_last() {
        // 0 consumes what 1 and 2 produce.
        let successors = vec![vec![], vec![0], vec![0]];
        let schedule = schedule(&successors).unwrap();

        assert_eq!(schedule.order.last(), Some(&0));
        assert!(schedule.final_index[1] < schedule.final_index[0]);
        assert!(schedule.final_index[2] < schedule.final_index[0]);
    }

    #[test]
    fn diamond_has_consumer_last_and_longest_distance() {
        // a -> c, b -> c, c -> d, a -> d
        let successors = vec![vec![2, 3], vec![2], vec![3], vec![]];
        let schedule = schedule(&successors).unwrap();

        for (pass, nexts) in successors.iter().enumerate() {
            for &next in nexts {
                assert!(schedule.final_index[pass] < schedule.final_index[next]);
            }
        }
        assert_eq!(schedule.distance[3], 2);
    }

    #[test]
    fn cycles_are_reported() {
        let successors = vec![vec![1], vec![0]];

        assert_eq!(schedule(&successors), Err(CycleAt(0)));
    }

    #[test]
    fn self_edges_are_cycles() {
        let successors = vec![vec![], vec![1]];

        assert_eq!(schedule(&successors), Err(CycleAt(1)));
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let count = 100_000;
        let successors = (0..count)
            .map(|pass| if pass + 1 < count { vec![pass + 1] } else { vec![] })
            .collect::<Vec<_>>();
        let schedule = schedule(&successors).unwrap();

        assert_eq!(schedule.order[count - 1], count - 1);
        assert_eq!(schedule.distance[count - 1], (count - 1) as u32);
    }

    #[test]
    fn empty_graph_schedules_nothing() {
        let schedule = schedule(&[]).unwrap();

        assert!(schedule.order.is_empty());
    }
}
