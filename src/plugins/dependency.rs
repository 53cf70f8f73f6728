//! Load-order resolution over required-dependency edges

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::entities::PluginDescriptor;

/// Result of ordering a set of plugins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPlan {
    /// Dependencies before dependents; ties keep discovery order
    pub order: Vec<String>,
    /// Each cyclic set as a closed path, e.g. `[a, b, a]`
    pub cycles: Vec<Vec<String>>,
    /// Plugins that only wait on a cyclic set, with the dependency they wait on
    pub blocked: Vec<(String, String)>,
}

impl LoadPlan {
    pub fn cycle_for(&self, name: &str) -> Option<&Vec<String>> {
        self.cycles
            .iter()
            .find(|path| path.iter().any(|n| n == name))
    }
}

/// Order `descriptors` so every plugin follows its required dependencies.
///
/// Dependencies on names outside the set add no edge; the loader reports them
/// as missing when the dependent's turn comes.
pub fn resolve_load_order(descriptors: &[PluginDescriptor]) -> LoadPlan {
    let index: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    // deps[i] = indices i requires
    let deps: Vec<Vec<usize>> = descriptors
        .iter()
        .map(|d| {
            let mut seen = HashSet::new();
            d.dependencies
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .filter(|j| seen.insert(*j))
                .collect()
        })
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    let mut indegree: Vec<usize> = vec![0; descriptors.len()];
    for (i, ds) in deps.iter().enumerate() {
        indegree[i] = ds.len();
        for &j in ds {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..descriptors.len()).filter(|&i| indegree[i] == 0).collect();
    let mut ordered = vec![false; descriptors.len()];
    let mut plan = LoadPlan::default();

    while let Some(i) = ready.pop_first() {
        ordered[i] = true;
        plan.order.push(descriptors[i].name.clone());
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    let remaining: Vec<usize> = (0..descriptors.len()).filter(|&i| !ordered[i]).collect();
    if remaining.is_empty() {
        return plan;
    }

    // Everything left either sits on a cycle or depends on one.
    let reach: HashMap<usize, HashSet<usize>> = remaining
        .iter()
        .map(|&i| (i, reachable(i, &deps, &ordered)))
        .collect();

    let mut assigned: HashSet<usize> = HashSet::new();
    for &i in &remaining {
        if assigned.contains(&i) || !reach[&i].contains(&i) {
            continue;
        }
        let members: HashSet<usize> = remaining
            .iter()
            .copied()
            .filter(|&j| j == i || (reach[&i].contains(&j) && reach[&j].contains(&i)))
            .collect();
        assigned.extend(members.iter().copied());

        let path = cycle_path(i, &deps, &members)
            .into_iter()
            .map(|k| descriptors[k].name.clone())
            .collect();
        plan.cycles.push(path);
    }

    for &i in &remaining {
        if assigned.contains(&i) {
            continue;
        }
        if let Some(&dep) = deps[i].iter().find(|&&j| !ordered[j]) {
            plan.blocked
                .push((descriptors[i].name.clone(), descriptors[dep].name.clone()));
        }
    }

    plan
}

/// Nodes reachable from `start` through unordered dependencies (excluding
/// `start` itself unless it lies on a cycle)
fn reachable(start: usize, deps: &[Vec<usize>], ordered: &[bool]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack: Vec<usize> = deps[start].iter().copied().filter(|&j| !ordered[j]).collect();
    while let Some(n) = stack.pop() {
        if seen.insert(n) {
            stack.extend(deps[n].iter().copied().filter(|&j| !ordered[j]));
        }
    }
    seen
}

/// Shortest closed path from `start` back to itself inside `members`
fn cycle_path(start: usize, deps: &[Vec<usize>], members: &HashSet<usize>) -> Vec<usize> {
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::new();

    for &n in &deps[start] {
        if n == start {
            return vec![start, start];
        }
        if members.contains(&n) && !parent.contains_key(&n) {
            parent.insert(n, start);
            queue.push_back(n);
        }
    }

    while let Some(n) = queue.pop_front() {
        for &next in &deps[n] {
            if next == start {
                let mut chain = vec![n];
                let mut cur = n;
                while parent[&cur] != start {
                    cur = parent[&cur];
                    chain.push(cur);
                }
                chain.reverse();

                let mut path = vec![start];
                path.extend(chain);
                path.push(start);
                return path;
            }
            if members.contains(&next) && !parent.contains_key(&next) {
                parent.insert(next, n);
                queue.push_back(next);
            }
        }
    }

    vec![start, start]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str, deps: &[&str]) -> PluginDescriptor {
        PluginDescriptor::new(name, "1.0.0")
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn test_dependencies_come_first() {
        let plan = resolve_load_order(&[
            plugin("c", &["b"]),
            plugin("a", &[]),
            plugin("b", &["a"]),
        ]);
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert!(plan.cycles.is_empty());
    }

    #[test]
    fn test_independent_plugins_keep_discovery_order() {
        let plan = resolve_load_order(&[plugin("z", &[]), plugin("a", &[]), plugin("m", &[])]);
        assert_eq!(plan.order, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_two_node_cycle_with_independent_plugin() {
        let plan = resolve_load_order(&[
            plugin("a", &["b"]),
            plugin("b", &["a"]),
            plugin("c", &[]),
        ]);
        assert_eq!(plan.order, vec!["c"]);
        assert_eq!(plan.cycles, vec![vec!["a", "b", "a"]]);
        assert!(plan.cycle_for("b").is_some());
        assert!(plan.cycle_for("c").is_none());
    }

    #[test]
    fn test_three_node_cycle_path_follows_edges() {
        let plan = resolve_load_order(&[
            plugin("a", &["b"]),
            plugin("b", &["c"]),
            plugin("c", &["a"]),
        ]);
        assert_eq!(plan.cycles, vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let plan = resolve_load_order(&[plugin("loop", &["loop"])]);
        assert_eq!(plan.cycles, vec![vec!["loop", "loop"]]);
        assert!(plan.order.is_empty());
    }

    #[test]
    fn test_dependent_of_cycle_is_blocked_not_cyclic() {
        let plan = resolve_load_order(&[
            plugin("a", &["b"]),
            plugin("b", &["a"]),
            plugin("d", &["a"]),
        ]);
        assert_eq!(plan.cycles.len(), 1);
        assert_eq!(plan.blocked, vec![("d".to_string(), "a".to_string())]);
    }

    #[test]
    fn test_missing_dependency_adds_no_edge() {
        let plan = resolve_load_order(&[plugin("c", &["ghost"])]);
        assert_eq!(plan.order, vec!["c"]);
    }
}
