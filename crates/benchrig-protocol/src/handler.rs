use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use benchrig_model::{CommandDefinition, CommandResult, Error, PortDefinition, SessionState};

use crate::WireTransport;

/// Pause between consecutive commands of a sequence, giving slow UUT
/// firmware time to re-arm its parser.
pub(crate) const INTER_COMMAND_DELAY: Duration = Duration::from_millis(50);

/// An open handler-level state on one physical port.
///
/// Owned by the workflow engine for the duration of a run; a handler never
/// serves two sessions on the same port.
pub struct Session {
    pub state: SessionState,
    pub(crate) transport: Box<dyn WireTransport>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("state", &self.state).finish()
    }
}

impl Session {
    pub(crate) fn new(state: SessionState, transport: Box<dyn WireTransport>) -> Self {
        Session { state, transport }
    }

    pub fn session_id(&self) -> Uuid {
        self.state.session_id
    }

    pub fn port_name(&self) -> &str {
        &self.state.port_name
    }
}

/// Cumulative per-handler execution counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerStats {
    pub total_commands: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub total_execution: Duration,
    pub last_command_at: Option<SystemTime>,
}

/// One wire protocol's implementation of command execution.
///
/// Handlers are short-lived: the registry builds one per workflow, and the
/// workflow closes its session when done.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn protocol(&self) -> &'static str;

    async fn open_session(
        &self,
        port_name: &str,
        port: &PortDefinition,
        token: &CancellationToken,
    ) -> Result<Session, Error>;

    async fn execute_command(
        &self,
        session: &mut Session,
        command: &CommandDefinition,
        token: &CancellationToken,
    ) -> CommandResult;

    /// Runs `commands` in order, stopping at the first non-success.
    async fn execute_sequence(
        &self,
        session: &mut Session,
        commands: &[CommandDefinition],
        token: &CancellationToken,
    ) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_COMMAND_DELAY).await;
            }
            let result = self.execute_command(session, command, token).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    async fn close_session(&self, session: Session) -> Result<(), Error>;

    /// Opens and immediately closes a session to probe the port.
    async fn test_connectivity(&self, port_name: &str, port: &PortDefinition) -> bool;

    fn stats(&self) -> HandlerStats;
}

impl std::fmt::Debug for dyn ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("protocol", &self.protocol())
            .finish()
    }
}
