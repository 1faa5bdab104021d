//! Structural plan validation.

use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::error::{PlanningError, Result};
use crate::types::{ActionPlan, ActionStep, ExecutionModel, ValidationReport};

/// Checks a plan against an action registry. All violations are reported,
/// not only the first.
pub struct PlanValidator<'a> {
    actions: &'a ActionRegistry,
    max_steps: usize,
}

impl<'a> PlanValidator<'a> {
    pub fn new(actions: &'a ActionRegistry, max_steps: usize) -> Self {
        Self { actions, max_steps }
    }

    pub fn validate(&self, plan: &ActionPlan) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Err(e) = self.run_checks(plan, &mut report) {
            report.errors.push(format!("Validation error: {}", e));
        }

        report.valid = report.errors.is_empty();
        debug!(
            "[PlanningService] Validated plan {}: {} errors, {} warnings",
            plan.id,
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    fn run_checks(&self, plan: &ActionPlan, report: &mut ValidationReport) -> Result<()> {
        let errors = &mut report.errors;

        if plan.id.is_nil() {
            errors.push("Plan missing required field: id".to_string());
        }
        if plan.goal.trim().is_empty() {
            errors.push("Plan missing required field: goal".to_string());
        }
        if plan.steps.is_empty() {
            errors.push("Plan has no steps".to_string());
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if step.id.is_nil() {
                errors.push(format!("Step {} missing id", index));
            }
            if step.action_name.trim().is_empty() {
                errors.push(format!("Step {} missing action name", index));
            }
        }

        for step in &plan.steps {
            if !step.action_name.trim().is_empty() && !self.actions.contains(&step.action_name) {
                errors.push(format!(
                    "Action '{}' not found in registry",
                    step.action_name
                ));
            }
        }

        let step_ids: HashSet<Uuid> = plan.steps.iter().map(|s| s.id).collect();
        for step in &plan.steps {
            for dep_id in &step.dependencies {
                if !step_ids.contains(dep_id) {
                    errors.push(format!(
                        "Step '{}' has invalid dependency '{}'",
                        step.id, dep_id
                    ));
                }
            }
        }

        if plan.execution_model == ExecutionModel::Dag && has_cycle(&plan.steps)? {
            errors.push("Plan has circular dependencies".to_string());
        }

        if plan.steps.len() > self.max_steps {
            report.warnings.push(format!(
                "Plan has {} steps, more than the configured maximum of {}",
                plan.steps.len(),
                self.max_steps
            ));
        }
        if plan.execution_model == ExecutionModel::Parallel
            && plan.steps.iter().any(|s| !s.dependencies.is_empty())
        {
            report
                .warnings
                .push("Step dependencies are ignored by parallel execution".to_string());
        }

        Ok(())
    }
}

/// Depth-first search over dependency edges; reaching a step that is still
/// on the current path means a cycle. Edges to unknown steps are skipped.
pub(crate) fn has_cycle(steps: &[ActionStep]) -> Result<bool> {
    let mut index: HashMap<Uuid, &ActionStep> = HashMap::with_capacity(steps.len());
    for step in steps {
        if index.insert(step.id, step).is_some() {
            return Err(PlanningError::ValidationFailed(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut on_path: HashSet<Uuid> = HashSet::new();

    for root in steps {
        if visited.contains(&root.id) {
            continue;
        }
        // (step, next dependency to explore)
        let mut stack: Vec<(Uuid, usize)> = vec![(root.id, 0)];
        visited.insert(root.id);
        on_path.insert(root.id);

        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let deps = &index[&id].dependencies;
            if top.1 >= deps.len() {
                on_path.remove(&id);
                stack.pop();
                continue;
            }
            let dep = deps[top.1];
            top.1 += 1;

            if !index.contains_key(&dep) {
                continue;
            }
            if on_path.contains(&dep) {
                return Ok(true);
            }
            if visited.insert(dep) {
                on_path.insert(dep);
                stack.push((dep, 0));
            }
        }
    }

    Ok(false)
}
