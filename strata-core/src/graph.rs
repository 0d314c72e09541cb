//! Graph - Dependency graph of declared resources
//!
//! Edges run from a producer to each consumer that references one of its
//! attributes or names it in `depends_on`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{ConfigError, CycleError};
use crate::resource::ResourceSpec;

/// A declared resource with its resolved dependency edges
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub spec: ResourceSpec,
    /// Position in the configuration, used to break ordering ties
    pub index: usize,
    /// Logical names of producers, in declaration order
    pub dependencies: Vec<String>,
}

impl ResourceNode {
    pub fn name(&self) -> &str {
        self.spec.name()
    }
}

/// Acyclic dependency graph with a precomputed topological order
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    by_name: HashMap<String, usize>,
    /// Producer -> consumers, in declaration order
    dependents: HashMap<String, Vec<String>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph from resources in declaration order
    pub fn build(resources: Vec<ResourceSpec>) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::new();
        for (index, spec) in resources.iter().enumerate() {
            if by_name.insert(spec.name().to_string(), index).is_some() {
                return Err(ConfigError::DuplicateName(spec.name().to_string()));
            }
        }

        let mut nodes = Vec::with_capacity(resources.len());
        for (index, spec) in resources.into_iter().enumerate() {
            let mut deps: Vec<usize> = Vec::new();
            let targets = spec
                .references()
                .into_iter()
                .map(|r| r.target.as_str())
                .chain(spec.depends_on.iter().map(String::as_str));

            for target in targets {
                let Some(&dep) = by_name.get(target) else {
                    return Err(ConfigError::DanglingReference {
                        resource: spec.name().to_string(),
                        target: target.to_string(),
                    });
                };
                if dep == index {
                    return Err(CycleError {
                        path: vec![target.to_string(), target.to_string()],
                    }
                    .into());
                }
                deps.push(dep);
            }
            deps.sort_unstable();
            deps.dedup();

            nodes.push((spec, index, deps));
        }

        let names: Vec<String> = nodes.iter().map(|(s, _, _)| s.name().to_string()).collect();
        let nodes: Vec<ResourceNode> = nodes
            .into_iter()
            .map(|(spec, index, deps)| ResourceNode {
                spec,
                index,
                dependencies: deps.into_iter().map(|d| names[d].clone()).collect(),
            })
            .collect();

        let mut graph = Self {
            nodes,
            by_name,
            dependents: HashMap::new(),
            order: Vec::new(),
        };
        for node in &graph.nodes {
            for dep in &node.dependencies {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.name().to_string());
            }
        }

        if let Some(path) = graph.find_cycle() {
            return Err(CycleError { path }.into());
        }
        graph.order = graph.topological_indices();

        log::debug!(
            "Built dependency graph with {} resources: {}",
            graph.nodes.len(),
            graph
                .topological_order()
                .map(|n| n.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    /// Nodes with every producer before its consumers; ties keep declaration order
    pub fn topological_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.get(name).map_or(&[], |n| n.dependencies.as_slice())
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Every resource that depends on `name` directly or indirectly, in topological order
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut reached = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if reached.insert(dependent.as_str()) {
                    stack.push(dependent);
                }
            }
        }

        self.topological_order()
            .filter(|n| reached.contains(n.name()))
            .map(|n| n.name().to_string())
            .collect()
    }

    /// Depth-first search with recursion-stack marking; returns the first cycle found
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if let Some(path) = self.find_cycle_from(node.index, &mut visited, &mut stack) {
                return Some(path);
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        index: usize,
        visited: &mut HashSet<usize>,
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|&i| i == index) {
            let mut path: Vec<String> = stack[pos..]
                .iter()
                .map(|&i| self.nodes[i].name().to_string())
                .collect();
            path.push(self.nodes[index].name().to_string());
            return Some(path);
        }
        if !visited.insert(index) {
            return None;
        }

        stack.push(index);
        for dep in &self.nodes[index].dependencies {
            let dep_index = self.by_name[dep];
            if let Some(path) = self.find_cycle_from(dep_index, visited, stack) {
                return Some(path);
            }
        }
        stack.pop();
        None
    }

    /// Kahn's algorithm with a min-heap on declaration index
    fn topological_indices(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, d)| *d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for dependent in self.dependents_of(self.nodes[index].name()) {
                let d = self.by_name[dependent];
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.push(Reverse(d));
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec::new("sandbox.thing", name)
    }

    fn names<'a>(it: impl Iterator<Item = &'a ResourceNode>) -> Vec<String> {
        it.map(|n| n.name().to_string()).collect()
    }

    #[test]
    fn topological_order_respects_references() {
        // Declared out of order on purpose
        let resources = vec![
            spec("service").with_attribute("subnet", Value::reference("subnet", "id")),
            spec("subnet").with_attribute("vpc", Value::reference("vpc", "id")),
            spec("vpc"),
        ];
        let graph = DependencyGraph::build(resources).unwrap();
        assert_eq!(
            names(graph.topological_order()),
            vec!["vpc", "subnet", "service"]
        );
        assert_eq!(graph.dependencies_of("subnet"), &["vpc".to_string()]);
        assert_eq!(graph.dependents_of("vpc"), &["subnet".to_string()]);
    }

    #[test]
    fn ties_broken_by_declaration_order() {
        let resources = vec![
            spec("c"),
            spec("a"),
            spec("b").with_depends_on("c"),
            spec("d"),
        ];
        let graph = DependencyGraph::build(resources).unwrap();
        assert_eq!(names(graph.topological_order()), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn depends_on_adds_edges() {
        let resources = vec![spec("role"), spec("cluster").with_depends_on("role")];
        let graph = DependencyGraph::build(resources).unwrap();
        assert_eq!(graph.dependencies_of("cluster"), &["role".to_string()]);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let resources = vec![
            spec("vpc"),
            spec("sg")
                .with_attribute("a", Value::reference("vpc", "id"))
                .with_attribute("b", Value::reference("vpc", "cidr_block"))
                .with_depends_on("vpc"),
        ];
        let graph = DependencyGraph::build(resources).unwrap();
        assert_eq!(graph.dependencies_of("sg").len(), 1);
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let resources = vec![
            spec("a").with_attribute("x", Value::reference("c", "id")),
            spec("b").with_attribute("x", Value::reference("a", "id")),
            spec("c").with_attribute("x", Value::reference("b", "id")),
        ];
        let err = DependencyGraph::build(resources).unwrap_err();
        let ConfigError::Cycle(cycle) = err else {
            panic!("expected cycle error, got {err:?}");
        };
        assert_eq!(cycle.path, vec!["a", "c", "b", "a"]);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let resources = vec![spec("a").with_attribute("x", Value::reference("a", "id"))];
        assert!(matches!(
            DependencyGraph::build(resources),
            Err(ConfigError::Cycle(_))
        ));
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let resources = vec![spec("a").with_attribute("x", Value::reference("missing", "id"))];
        assert!(matches!(
            DependencyGraph::build(resources),
            Err(ConfigError::DanglingReference { target, .. }) if target == "missing"
        ));
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let resources = vec![spec("a"), ResourceSpec::new("sandbox.other", "a")];
        assert!(matches!(
            DependencyGraph::build(resources),
            Err(ConfigError::DuplicateName(name)) if name == "a"
        ));
    }

    #[test]
    fn transitive_dependents_in_order() {
        let resources = vec![
            spec("vpc"),
            spec("subnet").with_depends_on("vpc"),
            spec("sg").with_depends_on("vpc"),
            spec("lb").with_depends_on("subnet").with_depends_on("sg"),
            spec("role"),
        ];
        let graph = DependencyGraph::build(resources).unwrap();
        assert_eq!(graph.transitive_dependents("vpc"), vec!["subnet", "sg", "lb"]);
        assert!(graph.transitive_dependents("role").is_empty());
    }
}
