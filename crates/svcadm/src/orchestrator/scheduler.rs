//! Start-order scheduling
//!
//! Services are grouped into batches with Kahn's layered topological sort:
//! every service in batch `k` only depends on services in earlier batches,
//! so a batch can be started concurrently once its predecessors finished.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::ServiceSpec;
use crate::error::ServiceError;
use crate::services::ServiceKind;

/// Prerequisites every instance of a service kind needs, regardless of
/// configuration.
const STATIC_NEEDS: &[(ServiceKind, &[ServiceKind])] = &[
    (ServiceKind::Gitlab, &[ServiceKind::Postgresql]),
    (ServiceKind::Mattermost, &[ServiceKind::Postgresql]),
    (ServiceKind::Sonarqube, &[ServiceKind::Postgresql]),
];

/// `service -> prerequisites` mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    needs: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph for a set of services: the static edges plus an edge from the
    /// proxy to every service it fronts.
    pub fn for_services(services: &[ServiceSpec]) -> Self {
        let mut graph = Self::new();

        for (dependent, prerequisites) in STATIC_NEEDS {
            for prerequisite in *prerequisites {
                graph.add_dependency(dependent.as_str(), prerequisite.as_str());
            }
        }

        let proxy = ServiceKind::Nginx.as_str();
        for service in services {
            if service.proxy_frontend && service.name != proxy {
                graph.add_dependency(proxy, &service.name);
            }
        }

        graph
    }

    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str) -> &mut Self {
        self.needs
            .entry(dependent.to_string())
            .or_default()
            .insert(prerequisite.to_string());
        self
    }

    pub fn prerequisites(&self, name: &str) -> impl Iterator<Item = &str> {
        self.needs
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// `(dependent, prerequisite)` pairs where the dependent is enabled but
    /// the prerequisite is not.
    pub fn missing_prerequisites(&self, enabled: &[ServiceSpec]) -> Vec<(String, String)> {
        let names: BTreeSet<&str> = enabled.iter().map(|s| s.name.as_str()).collect();
        let mut missing = Vec::new();
        for service in enabled {
            for prerequisite in self.prerequisites(&service.name) {
                if !names.contains(prerequisite) {
                    missing.push((service.name.clone(), prerequisite.to_string()));
                }
            }
        }
        missing
    }
}

/// Group `enabled` into start batches. Prerequisites that are not enabled
/// are ignored. Within a batch services keep their order in `enabled`.
pub fn compute_batches(
    enabled: &[String],
    graph: &DependencyGraph,
) -> Result<Vec<Vec<String>>, ServiceError> {
    let position: HashMap<&str, usize> = enabled
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in enabled {
        let prerequisites: Vec<&str> = graph
            .prerequisites(name)
            .filter(|p| position.contains_key(p) && *p != name.as_str())
            .collect();
        in_degree.insert(name.as_str(), prerequisites.len());
        for prerequisite in prerequisites {
            dependents
                .entry(prerequisite)
                .or_default()
                .push(name.as_str());
        }
    }

    // A self-edge is a cycle of one
    let self_dependent: Vec<String> = enabled
        .iter()
        .filter(|name| graph.prerequisites(name).any(|p| p == name.as_str()))
        .cloned()
        .collect();
    if !self_dependent.is_empty() {
        return Err(ServiceError::DependencyCycle {
            services: self_dependent,
        });
    }

    let mut batches = Vec::new();
    let mut current: Vec<&str> = enabled
        .iter()
        .map(String::as_str)
        .filter(|name| in_degree[name] == 0)
        .collect();
    let mut scheduled = 0;

    while !current.is_empty() {
        scheduled += current.len();
        let mut next = Vec::new();
        for name in &current {
            for dependent in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        next.sort_by_key(|name| position[name]);
        batches.push(current.iter().map(|name| name.to_string()).collect());
        current = next;
    }

    if scheduled < enabled.len() {
        let remaining = enabled
            .iter()
            .filter(|name| in_degree[name.as_str()] > 0)
            .cloned()
            .collect();
        return Err(ServiceError::DependencyCycle {
            services: remaining,
        });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn spec(name: &str, proxy_frontend: bool) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            proxy_frontend,
            ..Default::default()
        }
    }

    #[test]
    fn test_postgres_before_sonarqube() {
        let services = vec![spec("sonarqube", false), spec("postgresql", false)];
        let graph = DependencyGraph::for_services(&services);

        let batches = compute_batches(&names(&["sonarqube", "postgresql"]), &graph).unwrap();
        assert_eq!(
            batches,
            vec![names(&["postgresql"]), names(&["sonarqube"])]
        );
    }

    #[test]
    fn test_nginx_waits_for_fronted_services() {
        let services = vec![
            spec("nginx", false),
            spec("postgresql", false),
            spec("gitlab", true),
            spec("vault", true),
            spec("trivy", false),
        ];
        let graph = DependencyGraph::for_services(&services);
        let enabled = names(&["nginx", "postgresql", "gitlab", "vault", "trivy"]);

        let batches = compute_batches(&enabled, &graph).unwrap();
        assert_eq!(
            batches,
            vec![
                names(&["postgresql", "vault", "trivy"]),
                names(&["gitlab"]),
                names(&["nginx"]),
            ]
        );
    }

    #[test]
    fn test_disabled_prerequisites_are_ignored() {
        let graph = DependencyGraph::for_services(&[]);
        let batches = compute_batches(&names(&["gitlab"]), &graph).unwrap();
        assert_eq!(batches, vec![names(&["gitlab"])]);
    }

    #[test]
    fn test_cycle_rejected_without_partial_schedule() {
        let mut graph = DependencyGraph::for_services(&[]);
        graph.add_dependency("postgresql", "sonarqube");

        let err = compute_batches(&names(&["postgresql", "sonarqube", "trivy"]), &graph)
            .unwrap_err();
        match err {
            ServiceError::DependencyCycle { services } => {
                assert_eq!(services, names(&["postgresql", "sonarqube"]));
            }
            other => panic!("Expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("vault", "vault");
        assert!(matches!(
            compute_batches(&names(&["vault"]), &graph),
            Err(ServiceError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_missing_prerequisites() {
        let services = vec![spec("mattermost", false), spec("nginx", false)];
        let graph = DependencyGraph::for_services(&services);
        assert_eq!(
            graph.missing_prerequisites(&services),
            vec![("mattermost".to_string(), "postgresql".to_string())]
        );
    }

    /// Random DAGs: edges only point from a higher to a lower index.
    #[test]
    fn test_random_acyclic_graphs_respect_edges() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let count = rng.gen_range(1..12);
            let enabled: Vec<String> = (0..count).map(|i| format!("svc{i}")).collect();
            let mut graph = DependencyGraph::new();
            let mut edges = Vec::new();
            for dependent in 1..count {
                for prerequisite in 0..dependent {
                    if rng.gen_bool(0.3) {
                        graph.add_dependency(&enabled[dependent], &enabled[prerequisite]);
                        edges.push((dependent, prerequisite));
                    }
                }
            }

            let batches = compute_batches(&enabled, &graph).unwrap();
            let batch_of: HashMap<&str, usize> = batches
                .iter()
                .enumerate()
                .flat_map(|(i, batch)| batch.iter().map(move |name| (name.as_str(), i)))
                .collect();

            // every service exactly once
            assert_eq!(batch_of.len(), count);
            assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), count);

            for (dependent, prerequisite) in edges {
                assert!(
                    batch_of[enabled[prerequisite].as_str()] < batch_of[enabled[dependent].as_str()]
                );
            }
        }
    }

    #[test]
    fn test_random_cyclic_graphs_rejected() {
        let mut rng = StdRng::seed_from_u64(0xc1c1e);

        for _ in 0..100 {
            let count = rng.gen_range(2..10);
            let enabled: Vec<String> = (0..count).map(|i| format!("svc{i}")).collect();
            let mut graph = DependencyGraph::new();
            // a ring through a random subset of at least two nodes
            let start = rng.gen_range(0..count - 1);
            let end = rng.gen_range(start + 1..count);
            for i in start..end {
                graph.add_dependency(&enabled[i], &enabled[i + 1]);
            }
            graph.add_dependency(&enabled[end], &enabled[start]);

            assert!(matches!(
                compute_batches(&enabled, &graph),
                Err(ServiceError::DependencyCycle { .. })
            ));
        }
    }
}
