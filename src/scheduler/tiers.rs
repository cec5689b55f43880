use super::SchedulerError;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Steps partitioned into dependency tiers. Each tier holds indices into the input list,
/// in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPlan {
    pub tiers: Vec<Vec<usize>>,
    pub warnings: Vec<String>,
}

impl TierPlan {
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Levels `(framework, depends_on)` pairs with Kahn's algorithm.
///
/// Tier 0 holds every step without a known prerequisite; tier k holds steps whose
/// prerequisites all sit in tiers below k. Dependencies on frameworks that have no
/// step are dropped with a warning. A cycle is an error naming its members.
pub fn compute_tiers(steps: &[(String, Vec<String>)]) -> Result<TierPlan, SchedulerError> {
    let mut plan = TierPlan::default();
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, (framework, _))| (framework.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, (framework, depends_on)) in steps.iter().enumerate() {
        for dependency in depends_on {
            match index.get(dependency.as_str()) {
                Some(&j) if j == i => {
                    return Err(SchedulerError::DependencyCycle(vec![framework.clone()]));
                }
                Some(&j) => {
                    in_degree[i] += 1;
                    dependents[j].push(i);
                }
                None => {
                    let message = format!(
                        "Build for '{}' depends on '{}', which has no build step; ignoring",
                        framework, dependency
                    );
                    warn!(framework = %framework, dependency = %dependency, "Unknown build dependency");
                    plan.warnings.push(message);
                }
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0;

    while !ready.is_empty() {
        let mut tier: Vec<usize> = ready.drain(..).collect();
        tier.sort_unstable();
        placed += tier.len();

        for &step in &tier {
            for &dependent in &dependents[step] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        plan.tiers.push(tier);
    }

    if placed < steps.len() {
        let members = (0..steps.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| steps[i].0.clone())
            .collect();
        return Err(SchedulerError::DependencyCycle(members));
    }
    Ok(plan)
}
