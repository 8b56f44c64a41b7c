//! Phase execution.
//!
//! A phase container is created from the assembled builder, started, has its
//! output relayed to a [`LogSink`], and is waited on for its exit code. The
//! container is kept once an exit code is known and removed on any error
//! before that.

use std::sync::Arc;

use cnb_compose_core::error::Result;
use cnb_compose_core::lifecycle::ContainerStatus;
use cnb_compose_core::log::LogSink;

use super::context::PhaseContext;
use super::phase::LifecyclePhase;
use super::relay::LogRelay;
use crate::disposable::{with_container, Disposal};
use crate::engine::LogOptions;

/// Progress of one phase container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Created,
    Started,
    LogAttached,
    Waiting,
    Succeeded,
    Failed,
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::LogAttached => "log-attached",
            Self::Waiting => "waiting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn transition(phase: LifecyclePhase, container_id: &str, state: PhaseState) {
    tracing::debug!(phase = %phase, container_id = %container_id, state = %state, "Phase state");
}

/// Run one lifecycle phase to completion.
///
/// A non-zero exit code is returned in the status, not as an error.
pub async fn run_phase(
    context: &PhaseContext,
    phase: LifecyclePhase,
    sink: Arc<dyn LogSink>,
    use_timestamps: bool,
) -> Result<ContainerStatus> {
    let args = phase.args(context)?;
    let run_as = phase.run_as(context);
    let spec = context.phase_container_spec(&args, run_as, phase.needs_docker_socket());
    let runtime = context.runtime();

    tracing::info!(
        phase = %phase,
        image = %spec.image,
        uid = run_as.uid(context.builder()),
        "Running lifecycle phase"
    );

    let result = with_container(runtime, &spec, Disposal::OnFailure, |id| async move {
        transition(phase, &id, PhaseState::Created);

        runtime.start_container(&id).await?;
        transition(phase, &id, PhaseState::Started);

        let logs = runtime
            .attach_logs(&id, LogOptions::follow_all(use_timestamps))
            .await?;
        // Dropping the relay on an early return aborts it.
        let relay = LogRelay::spawn(logs, sink);
        transition(phase, &id, PhaseState::LogAttached);

        transition(phase, &id, PhaseState::Waiting);
        let rc = runtime.wait_container(&id).await?;

        if let Err(e) = relay.join().await {
            tracing::warn!(container_id = %id, error = %e, "Log relay ended with error");
        }

        let status = ContainerStatus::of(rc, id);
        let state = if status.is_success() {
            PhaseState::Succeeded
        } else {
            PhaseState::Failed
        };
        transition(phase, &status.container_id, state);
        Ok(status)
    })
    .await;

    match &result {
        Ok(status) => tracing::info!(
            phase = %phase,
            container_id = %status.container_id,
            rc = status.rc,
            "Lifecycle phase complete"
        ),
        Err(e) => tracing::warn!(
            phase = %phase,
            state = %PhaseState::Failed,
            error = %e,
            "Lifecycle phase failed"
        ),
    }
    result
}

/// Run the builder phase, which executes every detected buildpack's build
/// step against the application.
pub async fn run_builder_phase(
    context: &PhaseContext,
    sink: Arc<dyn LogSink>,
    use_timestamps: bool,
) -> Result<ContainerStatus> {
    run_phase(context, LifecyclePhase::Build, sink, use_timestamps).await
}
