#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use benchrig_model::{CommandSequence, Error, PortDefinition};
use benchrig_protocol::{Rs232Handler, WireSettings, WireTransport};

/// What a scripted device does in response to one written command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with the text followed by CRLF.
    Line(&'static str),
    /// Respond with raw bytes, no CRLF appended.
    Raw(&'static str),
    /// Deliver the response split into multiple chunks.
    Chunked(&'static [&'static str]),
    /// Say nothing; the reader runs into its timeout.
    Silence,
    /// Fail the read with a transport error.
    Error(&'static str),
}

/// In-memory wire: pops one [`Reply`] per write and serves it to the
/// subsequent reads.
pub struct ScriptedTransport {
    script: VecDeque<Reply>,
    pending: VecDeque<Vec<u8>>,
    fail_read: Option<String>,
    fail_open: Option<String>,
    pub writes: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>) -> Self {
        ScriptedTransport {
            script: script.into(),
            pending: VecDeque::new(),
            fail_read: None,
            fail_open: None,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_open(reason: &str) -> Self {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.fail_open = Some(reason.to_string());
        transport
    }

    pub fn writes_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.writes.clone()
    }
}

#[async_trait]
impl WireTransport for ScriptedTransport {
    async fn open(&mut self, settings: &WireSettings) -> Result<(), Error> {
        match self.fail_open.take() {
            Some(reason) => Err(Error::SessionOpenFailed {
                port_name: settings.port_name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn write_all(&mut self, bytes: &[u8], _token: &CancellationToken) -> Result<(), Error> {
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).into_owned());
        self.pending.clear();
        self.fail_read = None;
        match self.script.pop_front() {
            Some(Reply::Line(text)) => self.pending.push_back(format!("{text}\r\n").into_bytes()),
            Some(Reply::Raw(text)) => self.pending.push_back(text.as_bytes().to_vec()),
            Some(Reply::Chunked(chunks)) => {
                for chunk in chunks {
                    self.pending.push_back(chunk.as_bytes().to_vec());
                }
            }
            Some(Reply::Silence) | None => {}
            Some(Reply::Error(reason)) => self.fail_read = Some(reason.to_string()),
        }
        Ok(())
    }

    async fn read_chunk(
        &mut self,
        max_wait: Duration,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        if let Some(reason) = self.fail_read.take() {
            return Err(Error::Transport {
                port_name: "scripted".into(),
                reason,
            });
        }
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(chunk);
        }
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(max_wait) => {}
        }
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Handler whose next session runs over the given script; returns the
/// write log alongside.
pub fn handler_with(script: Vec<Reply>) -> (Rs232Handler, Arc<Mutex<Vec<String>>>) {
    let transport = ScriptedTransport::new(script);
    let writes = transport.writes_handle();
    let slot = Arc::new(Mutex::new(Some(transport)));
    let handler = Rs232Handler::with_transport_factory(Arc::new(move || {
        let transport = slot
            .lock()
            .unwrap()
            .take()
            .expect("scripted handler serves a single session");
        Box::new(transport) as Box<dyn WireTransport>
    }));
    (handler, writes)
}

/// A minimal RS-232 port definition for handler tests.
pub fn port_def() -> PortDefinition {
    PortDefinition {
        index: 1,
        protocol: "rs232".into(),
        speed: 115_200,
        data_pattern: "n81".into(),
        read_timeout: Duration::from_millis(3000),
        write_timeout: Duration::from_millis(3000),
        settings: Default::default(),
        start_commands: CommandSequence::default(),
        test_commands: CommandSequence::default(),
        stop_commands: CommandSequence::default(),
    }
}
