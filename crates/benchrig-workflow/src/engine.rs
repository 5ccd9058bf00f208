use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use benchrig_config::ConfigStore;
use benchrig_model::{
    CommandSequence, Error, PhaseOutcome, WorkflowPhase, WorkflowSummary,
};
use benchrig_protocol::{HandlerRegistry, ProtocolHandler, Session};

use crate::{RunLog, RunLogger};

/// Everything needed to run one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub config_path: PathBuf,
    pub bib_id: String,
    pub uut_id: String,
    pub port_index: u32,
    /// Physical port, typically taken from an active reservation.
    pub port_name: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub bib_id: String,
    pub uut_id: String,
    pub port_index: u32,
    pub port_name: String,
    pub phases: Vec<PhaseOutcome>,
    pub summary: WorkflowSummary,
}

impl WorkflowReport {
    /// All command results across phases, in execution order.
    pub fn results(&self) -> impl Iterator<Item = &benchrig_model::CommandResult> {
        self.phases.iter().flat_map(|p| p.results.iter())
    }
}

/// Drives start → test → stop against one reserved port.
///
/// Start and test abort on the first failing command; stop runs
/// unconditionally, cancellation included, and a stop failure only changes
/// the verdict when the earlier phases had succeeded.
pub struct WorkflowEngine {
    store: Arc<ConfigStore>,
    registry: Arc<HandlerRegistry>,
    run_logger: Option<Arc<RunLogger>>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<ConfigStore>, registry: Arc<HandlerRegistry>) -> Self {
        WorkflowEngine {
            store,
            registry,
            run_logger: None,
        }
    }

    pub fn with_run_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.run_logger = Some(logger);
        self
    }

    async fn run_phase(
        handler: &dyn ProtocolHandler,
        session: &mut Session,
        phase: WorkflowPhase,
        sequence: &CommandSequence,
        token: &CancellationToken,
        log: Option<&RunLog>,
    ) -> PhaseOutcome {
        if token.is_cancelled() && phase != WorkflowPhase::Stop {
            return PhaseOutcome {
                phase,
                success: false,
                results: Vec::new(),
                skipped: sequence.len(),
            };
        }

        let results = handler
            .execute_sequence(session, &sequence.commands, token)
            .await;
        if let Some(log) = log {
            for result in &results {
                log.append_result(result);
            }
        }
        let success = results.len() == sequence.len() && results.iter().all(|r| r.success);
        PhaseOutcome {
            phase,
            success,
            skipped: sequence.len() - results.len(),
            results,
        }
    }

    pub async fn run(
        &self,
        request: &WorkflowRequest,
        token: &CancellationToken,
    ) -> Result<WorkflowReport, Error> {
        let begun = Instant::now();
        let port = self.store.find_port(
            &request.config_path,
            &request.bib_id,
            &request.uut_id,
            request.port_index,
        )?;
        let handler = self.registry.create(&port.protocol)?;
        let mut session = handler
            .open_session(&request.port_name, &port, token)
            .await?;

        let log = self
            .run_logger
            .as_ref()
            .map(|logger| logger.begin_run(&request.bib_id, &request.uut_id, request.port_index));
        if let Some(log) = &log {
            log.append_line(&format!(
                "workflow {}/{}/port{} on {} (session {})",
                request.bib_id,
                request.uut_id,
                request.port_index,
                request.port_name,
                session.session_id()
            ));
        }
        info!(
            bib = %request.bib_id,
            uut = %request.uut_id,
            port_index = request.port_index,
            port = %request.port_name,
            "workflow started"
        );

        let mut phases = Vec::with_capacity(3);

        let start = Self::run_phase(
            handler.as_ref(),
            &mut session,
            WorkflowPhase::Start,
            &port.start_commands,
            token,
            log.as_ref(),
        )
        .await;
        let start_ok = start.success;
        phases.push(start);

        if start_ok {
            let test = Self::run_phase(
                handler.as_ref(),
                &mut session,
                WorkflowPhase::Test,
                &port.test_commands,
                token,
                log.as_ref(),
            )
            .await;
            phases.push(test);
        }

        // Stop runs no matter what happened above, on its own token: a
        // cancelled workflow must still leave the UUT in a safe state.
        let stop_token = CancellationToken::new();
        let stop = Self::run_phase(
            handler.as_ref(),
            &mut session,
            WorkflowPhase::Stop,
            &port.stop_commands,
            &stop_token,
            log.as_ref(),
        )
        .await;
        phases.push(stop);

        if let Err(err) = handler.close_session(session).await {
            warn!(port = %request.port_name, error = %err, "session close failed");
        }

        let earlier_failure = phases
            .iter()
            .filter(|p| p.phase != WorkflowPhase::Stop)
            .find(|p| !p.success)
            .map(|p| p.phase);
        let stop_failed = phases
            .iter()
            .any(|p| p.phase == WorkflowPhase::Stop && !p.success);
        let failed_phase = earlier_failure.or(stop_failed.then_some(WorkflowPhase::Stop));

        let command_count = phases.iter().map(|p| p.results.len()).sum();
        let summary = WorkflowSummary {
            success: failed_phase.is_none(),
            total_duration: begun.elapsed(),
            command_count,
            failed_phase,
        };
        if let Some(log) = &log {
            log.finish(&summary);
        }
        info!(
            bib = %request.bib_id,
            uut = %request.uut_id,
            outcome = %summary.describe(),
            "workflow finished"
        );

        Ok(WorkflowReport {
            bib_id: request.bib_id.clone(),
            uut_id: request.uut_id.clone(),
            port_index: request.port_index,
            port_name: request.port_name.clone(),
            phases,
            summary,
        })
    }
}
