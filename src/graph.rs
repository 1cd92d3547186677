//! Dependency graph over manifest steps.
//!
//! Construction validates the manifest's relationships and fixes the
//! execution order once; the graph is read-only afterwards.

use std::collections::{BTreeSet, HashMap};

use crate::error::ProvisionError;
use crate::manifest::Step;

/// Steps plus a validated, stable topological execution order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Steps in declaration order.
    steps: Vec<Step>,
    /// Step id -> index into `steps`.
    index: HashMap<String, usize>,
    /// Execution order as indices into `steps`.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph and its execution order.
    ///
    /// Uses Kahn's algorithm with the ready set keyed by declaration index,
    /// so steps with no ordering constraint between them run in the order
    /// they were declared. A purely linear manifest runs exactly as written.
    pub fn build(steps: Vec<Step>) -> Result<Self, ProvisionError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(ProvisionError::DuplicateStep {
                    id: step.id.clone(),
                });
            }
        }

        // deps[i] = distinct indices step i waits on
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(steps.len());
        for step in &steps {
            let mut resolved = Vec::with_capacity(step.depends_on.len());
            for dep in &step.depends_on {
                let Some(&j) = index.get(dep) else {
                    return Err(ProvisionError::UnknownDependency {
                        step_id: step.id.clone(),
                        missing_id: dep.clone(),
                    });
                };
                if !resolved.contains(&j) {
                    resolved.push(j);
                }
            }
            deps.push(resolved);
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (i, ds) in deps.iter().enumerate() {
            for &j in ds {
                dependents[j].push(i);
            }
        }

        let mut pending: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(steps.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &k in &dependents[i] {
                pending[k] -= 1;
                if pending[k] == 0 {
                    ready.insert(k);
                }
            }
        }

        if order.len() < steps.len() {
            let participants = find_cycle(&deps, &pending)
                .into_iter()
                .map(|i| steps[i].id.clone())
                .collect();
            return Err(ProvisionError::Cycle { participants });
        }

        Ok(Self {
            steps,
            index,
            order,
        })
    }

    /// Steps in execution order.
    pub fn order(&self) -> impl Iterator<Item = &Step> + '_ {
        self.order.iter().map(move |&i| &self.steps[i])
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Direct prerequisites of a step.
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &Step> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|step| step.depends_on.iter())
            .filter_map(move |dep| self.get(dep))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Extract one concrete cycle from the nodes Kahn's algorithm left behind.
///
/// Every leftover node still waits on at least one leftover node, so
/// following those edges from any leftover node must revisit a node.
fn find_cycle(deps: &[Vec<usize>], pending: &[usize]) -> Vec<usize> {
    let Some(start) = (0..pending.len()).find(|&i| pending[i] > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut seen_at: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&pos) = seen_at.get(&current) {
            let mut cycle = path.split_off(pos);
            // Report in execution direction: prerequisite before dependent.
            cycle.reverse();
            return cycle;
        }
        seen_at.insert(current, path.len());
        path.push(current);

        match deps[current].iter().copied().find(|&j| pending[j] > 0) {
            Some(next) => current = next,
            None => return path,
        }
    }
}
