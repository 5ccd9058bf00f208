use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use benchrig_model::{
    CommandDefinition, CommandResult, Error, FailureKind, PortDefinition, SessionState,
};

use crate::{
    validate_response, wire_settings_for, HandlerStats, ProtocolHandler, SerialWireTransport,
    Session, ValidationOutcome, WireTransport,
};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(1);

type TransportFactory = Arc<dyn Fn() -> Box<dyn WireTransport> + Send + Sync>;

/// Reference RS-232 protocol handler.
///
/// Writes command bytes verbatim and reads until CRLF, the per-command
/// timeout, or cancellation, whichever comes first. Retries are triggered
/// only by timeouts and response mismatches.
pub struct Rs232Handler {
    transports: TransportFactory,
    stats: Mutex<HandlerStats>,
}

impl Rs232Handler {
    /// Handler backed by real serial ports.
    pub fn new() -> Self {
        Rs232Handler::with_transport_factory(Arc::new(|| {
            Box::new(SerialWireTransport::new()) as Box<dyn WireTransport>
        }))
    }

    /// Handler over an arbitrary transport; tests inject scripted wires
    /// here.
    pub fn with_transport_factory(transports: TransportFactory) -> Self {
        Rs232Handler {
            transports,
            stats: Mutex::new(HandlerStats::default()),
        }
    }

    fn record(&self, success: bool, failure: Option<FailureKind>, duration: Duration) {
        let mut stats = self.stats.lock();
        stats.total_commands += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        if failure == Some(FailureKind::Timeout) {
            stats.timeouts += 1;
        }
        stats.total_execution += duration;
        stats.last_command_at = Some(SystemTime::now());
    }
}

impl Default for Rs232Handler {
    fn default() -> Self {
        Rs232Handler::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn partial_of(buf: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(buf);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Outcome of a single write-then-read attempt.
enum Attempt {
    /// A CRLF-terminated line arrived and was validated.
    Line(ValidationOutcome, String),
    /// The timeout elapsed with no complete line; carries any partial
    /// bytes, trimmed.
    Timeout(Option<String>),
    Transport(String),
    Cancelled(Option<String>),
}

async fn attempt_once(
    transport: &mut Box<dyn WireTransport>,
    command: &CommandDefinition,
    token: &CancellationToken,
) -> Attempt {
    // Line-oriented wire: terminate the command if the definition didn't.
    let mut bytes = command.command.clone().into_bytes();
    if !bytes.ends_with(b"\r\n") {
        bytes.extend_from_slice(b"\r\n");
    }
    if let Err(err) = transport.write_all(&bytes, token).await {
        return Attempt::Transport(err.to_string());
    }
    if token.is_cancelled() {
        return Attempt::Cancelled(None);
    }

    let deadline = Instant::now() + command.timeout;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        if token.is_cancelled() {
            return Attempt::Cancelled(partial_of(&buf));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Attempt::Timeout(partial_of(&buf));
        }
        match transport.read_chunk(remaining, token).await {
            Ok(chunk) => {
                buf.extend_from_slice(&chunk);
                if let Some(pos) = find_crlf(&buf) {
                    let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
                    let outcome = validate_response(command, &line);
                    return Attempt::Line(outcome, line.trim().to_string());
                }
            }
            Err(err) => return Attempt::Transport(err.to_string()),
        }
    }
}

#[async_trait]
impl ProtocolHandler for Rs232Handler {
    fn protocol(&self) -> &'static str {
        "rs232"
    }

    async fn open_session(
        &self,
        port_name: &str,
        port: &PortDefinition,
        token: &CancellationToken,
    ) -> Result<Session, Error> {
        let settings = wire_settings_for(port_name, port)?;
        let mut transport = (self.transports)();

        let opened = tokio::select! {
            _ = token.cancelled() => Err(Error::SessionOpenFailed {
                port_name: port_name.to_string(),
                reason: "open cancelled".to_string(),
            }),
            result = tokio::time::timeout(OPEN_TIMEOUT, transport.open(&settings)) => match result {
                Err(_) => Err(Error::SessionOpenFailed {
                    port_name: port_name.to_string(),
                    reason: format!("open timed out after {} ms", OPEN_TIMEOUT.as_millis()),
                }),
                Ok(Err(Error::SessionOpenFailed { port_name, reason })) => {
                    Err(Error::SessionOpenFailed { port_name, reason })
                }
                Ok(Err(other)) => Err(Error::SessionOpenFailed {
                    port_name: port_name.to_string(),
                    reason: other.to_string(),
                }),
                Ok(Ok(())) => Ok(()),
            },
        };
        opened?;

        let state = SessionState::new(port_name, self.protocol());
        debug!(port = %port_name, session = %state.session_id, "rs232 session opened");
        Ok(Session::new(state, transport))
    }

    async fn execute_command(
        &self,
        session: &mut Session,
        command: &CommandDefinition,
        token: &CancellationToken,
    ) -> CommandResult {
        let started_at = SystemTime::now();
        let begun = Instant::now();

        let mut success = false;
        let mut response: Option<String> = None;
        let mut captured = None;
        let mut failure: Option<FailureKind> = None;
        let mut failure_reason: Option<String> = None;
        let mut attempts = 0u32;

        if !session.state.active {
            failure = Some(FailureKind::Transport);
            failure_reason = Some("no active session".to_string());
        } else {
            let allowed = command.retry_count + 1;
            while attempts < allowed {
                attempts += 1;
                match attempt_once(&mut session.transport, command, token).await {
                    Attempt::Line(outcome, line) => {
                        response = Some(line);
                        if outcome.success {
                            success = true;
                            captured = outcome.captured;
                            failure = None;
                            failure_reason = None;
                            break;
                        }
                        failure = Some(FailureKind::ResponseMismatch);
                        failure_reason = outcome.reason;
                    }
                    Attempt::Timeout(partial) => {
                        // A device that answers without CRLF still counts
                        // if the partial satisfies the expectation.
                        let outcome = validate_response(command, partial.as_deref().unwrap_or(""));
                        response = partial;
                        if outcome.success {
                            success = true;
                            captured = outcome.captured;
                            failure = None;
                            failure_reason = None;
                            break;
                        }
                        failure = Some(FailureKind::Timeout);
                        failure_reason = Some(format!(
                            "no matching response within {} ms",
                            command.timeout.as_millis()
                        ));
                    }
                    Attempt::Transport(reason) => {
                        failure = Some(FailureKind::Transport);
                        failure_reason = Some(reason);
                        break;
                    }
                    Attempt::Cancelled(partial) => {
                        response = partial;
                        failure = Some(FailureKind::Cancelled);
                        failure_reason = Some("cancelled".to_string());
                        break;
                    }
                }
                if failure.is_some_and(|f| !f.is_retryable()) {
                    break;
                }
            }
        }

        let duration = begun.elapsed();
        if let Some(kind) = failure {
            warn!(
                port = %session.state.port_name,
                command = %command.command.trim_end(),
                ?kind,
                reason = failure_reason.as_deref().unwrap_or(""),
                attempts,
                "command failed"
            );
        }
        session.state.record(success);
        self.record(success, failure, duration);

        CommandResult {
            command: command.command.clone(),
            response,
            success,
            started_at,
            ended_at: SystemTime::now(),
            duration,
            protocol: self.protocol().to_string(),
            session_id: session.state.session_id,
            failure,
            failure_reason,
            captured_groups: captured,
            attempts,
        }
    }

    async fn close_session(&self, mut session: Session) -> Result<(), Error> {
        session.state.active = false;
        match tokio::time::timeout(CLOSE_TIMEOUT, session.transport.close()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport {
                port_name: session.state.port_name.clone(),
                reason: format!("close timed out after {} ms", CLOSE_TIMEOUT.as_millis()),
            }),
        }
    }

    async fn test_connectivity(&self, port_name: &str, port: &PortDefinition) -> bool {
        let Ok(mut settings) = wire_settings_for(port_name, port) else {
            return false;
        };
        settings.read_timeout = CONNECTIVITY_TIMEOUT;
        settings.write_timeout = CONNECTIVITY_TIMEOUT;

        let mut transport = (self.transports)();
        let opened =
            match tokio::time::timeout(CONNECTIVITY_TIMEOUT, transport.open(&settings)).await {
                Ok(Ok(())) => true,
                _ => false,
            };
        if opened {
            let _ = tokio::time::timeout(CONNECTIVITY_TIMEOUT, transport.close()).await;
        }
        opened
    }

    fn stats(&self) -> HandlerStats {
        *self.stats.lock()
    }
}
