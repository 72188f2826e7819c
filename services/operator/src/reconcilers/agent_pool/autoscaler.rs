//! Agent fleet autoscaling.
//!
//! Each pass computes the desired replica count from the pool's demand,
//! clamps it into the configured window and applies it unless the last
//! scaling event is still inside the cool-down for that direction.

use chrono::Utc;
use tfo_events::reasons;
use tfo_reconcile::{compute_desired_replicas, cooldown_seconds_remaining, ScaleDirection};
use tracing::{debug, info};

use super::demand::{pending_demand, Demand};
use crate::controller::{Pass, ReconcileResult};
use crate::fleet::FleetError;
use crate::resources::agent_pool::{AgentDeploymentAutoscaling, AutoscalingStatus};
use crate::resources::{AgentPoolRef, AgentPoolSpec};

pub(super) async fn autoscale(
    pass: &mut Pass<'_, AgentPoolSpec>,
    pool: &AgentPoolRef,
    autoscaling: &AgentDeploymentAutoscaling,
) -> ReconcileResult<()> {
    let key = pass.key();
    let demand = pending_demand(
        pass.client.as_ref(),
        &pass.spec().organization,
        pool,
        autoscaling.target_workspaces.as_deref(),
    )
    .await?;
    let desired = compute_desired_replicas(
        demand.agents,
        autoscaling.min_replicas,
        autoscaling.max_replicas,
    );
    let current = pass
        .ctx
        .fleet
        .replicas(&key)
        .await?
        .ok_or_else(|| FleetError::NotFound(key.clone()))?;
    pass.ctx.metrics.set_desired_replicas(&key, desired);

    let now = Utc::now();
    let Some(status) = pass.status().autoscaling.clone() else {
        // First observation seeds the status and starts the cool-down.
        if current != desired {
            scale(pass, demand, current, desired).await?;
        }
        pass.status_mut().autoscaling = Some(AutoscalingStatus {
            desired_replicas: desired,
            last_scaling_event: Some(now),
        });
        return Ok(());
    };

    let Some(direction) = ScaleDirection::between(current, desired) else {
        debug!(replicas = current, agents = demand.agents, "Agent fleet matches demand");
        if let Some(status) = pass.status_mut().autoscaling.as_mut() {
            status.desired_replicas = desired;
        }
        return Ok(());
    };

    let cooldown = autoscaling.cooldown(pass.ctx.settings.autoscaling_cooldown_seconds);
    let remaining = cooldown_seconds_remaining(
        status.last_scaling_event,
        now,
        &cooldown,
        current,
        desired,
    );
    if remaining > 0 {
        info!(
            from = current,
            to = desired,
            ?direction,
            remaining_seconds = remaining,
            "Scaling deferred by cool-down"
        );
        pass.normal(
            reasons::SCALING_DEFERRED,
            format!("Scaling from {current} to {desired} deferred for {remaining}s"),
        );
        return Ok(());
    }

    scale(pass, demand, current, desired).await?;
    pass.status_mut().autoscaling = Some(AutoscalingStatus {
        desired_replicas: desired,
        last_scaling_event: Some(now),
    });
    Ok(())
}

async fn scale(
    pass: &Pass<'_, AgentPoolSpec>,
    demand: Demand,
    current: i32,
    desired: i32,
) -> ReconcileResult<()> {
    pass.ctx.fleet.scale(&pass.key(), desired).await?;
    info!(
        from = current,
        to = desired,
        agents = demand.agents,
        algorithm = ?demand.algorithm,
        "Scaled agent fleet"
    );
    pass.normal(
        reasons::SCALED,
        format!(
            "Scaled agents from {current} to {desired} for a demand of {}",
            demand.agents
        ),
    );
    Ok(())
}
