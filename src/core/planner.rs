//! Change plan: diff the synthesized template against the last deployed lock.

use super::error::Result;
use super::template::{CfnResource, Template};
use super::types::{ExecutionPlan, PlanAction, PlannedChange, ResourceStatus, StateLock};
use crate::tripwire::hasher;

/// Compare every desired resource, in execution order, with the lock.
/// Locked resources missing from the template are planned for destruction.
pub fn plan(
    name: &str,
    template: &Template,
    execution_order: &[String],
    lock: Option<&StateLock>,
) -> Result<ExecutionPlan> {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for logical_id in execution_order {
        let Some(resource) = template.resources.get(logical_id) else {
            continue;
        };
        let action = determine_action(logical_id, resource, lock)?;
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            logical_id: logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            description: describe_action(logical_id, resource, &action),
            action,
        });
    }

    if let Some(lock) = lock {
        // reverse declaration order, matching how the engine tears down
        for (logical_id, locked) in lock.resources.iter().rev() {
            if template.resources.contains_key(logical_id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: logical_id.clone(),
                resource_type: locked.resource_type.clone(),
                action: PlanAction::Destroy,
                description: format!("{}: destroy {}", logical_id, locked.resource_type),
            });
        }
    }

    tracing::debug!(to_create, to_update, to_destroy, unchanged, "plan computed");
    Ok(ExecutionPlan {
        name: name.to_string(),
        changes,
        execution_order: execution_order.to_vec(),
        to_create,
        to_update,
        to_destroy,
        unchanged,
    })
}

fn determine_action(
    logical_id: &str,
    resource: &CfnResource,
    lock: Option<&StateLock>,
) -> Result<PlanAction> {
    let Some(locked) = lock.and_then(|l| l.resources.get(logical_id)) else {
        return Ok(PlanAction::Create);
    };
    if locked.resource_type != resource.resource_type {
        // type change means replacement; reported as an update
        return Ok(PlanAction::Update);
    }
    if locked.status != ResourceStatus::Deployed {
        return Ok(PlanAction::Update);
    }
    if locked.hash == hasher::hash_resource(resource)? {
        Ok(PlanAction::NoOp)
    } else {
        Ok(PlanAction::Update)
    }
}

fn describe_action(logical_id: &str, resource: &CfnResource, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", logical_id, resource.resource_type),
        PlanAction::Update => format!("{}: update (properties changed)", logical_id),
        PlanAction::Destroy => format!("{}: destroy", logical_id),
        PlanAction::NoOp => format!("{}: no changes", logical_id),
    }
}
