#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use benchrig_model::Error;
use benchrig_protocol::{
    HandlerRegistry, Rs232Handler, WireSettings, WireTransport,
};

/// Scripted device behavior, one entry per command written.
#[derive(Debug, Clone)]
pub enum Reply {
    Line(&'static str),
    Silence,
    Error(&'static str),
}

pub struct ScriptedTransport {
    script: VecDeque<Reply>,
    pending: Option<Vec<u8>>,
    fail_read: Option<String>,
    writes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl WireTransport for ScriptedTransport {
    async fn open(&mut self, _settings: &WireSettings) -> Result<(), Error> {
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8], _token: &CancellationToken) -> Result<(), Error> {
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).into_owned());
        self.pending = None;
        self.fail_read = None;
        match self.script.pop_front() {
            Some(Reply::Line(text)) => self.pending = Some(format!("{text}\r\n").into_bytes()),
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
        if let Some(bytes) = self.pending.take() {
            return Ok(bytes);
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

/// Registry whose `rs232` handler drives the given script; returns the
/// write log alongside.
pub fn scripted_registry(script: Vec<Reply>) -> (Arc<HandlerRegistry>, Arc<Mutex<Vec<String>>>) {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let transport = ScriptedTransport {
        script: script.into(),
        pending: None,
        fail_read: None,
        writes: writes.clone(),
    };
    let slot = Arc::new(Mutex::new(Some(transport)));
    let registry = HandlerRegistry::empty();
    registry.register(
        "rs232",
        Arc::new(move || {
            let slot = slot.clone();
            Arc::new(Rs232Handler::with_transport_factory(Arc::new(move || {
                let transport = slot
                    .lock()
                    .unwrap()
                    .take()
                    .expect("scripted registry serves a single session");
                Box::new(transport) as Box<dyn WireTransport>
            }))) as Arc<dyn benchrig_protocol::ProtocolHandler>
        }),
    );
    (Arc::new(registry), writes)
}

/// Writes a workflow configuration for one BIB/UUT/port with the default
/// INIT/PING/BYE sequences.
pub fn demo_config(dir: &std::path::Path) -> PathBuf {
    write_config(
        dir,
        r#"<bib id="demo_bench" description="integration demo">
  <uut id="u1">
    <port number="1">
      <protocol>rs232</protocol>
      <speed>115200</speed>
      <data_pattern>n81</data_pattern>
      <start>
        <command>INIT</command>
        <expected_response>READY</expected_response>
        <timeout_ms>500</timeout_ms>
      </start>
      <test>
        <command>PING</command>
        <expected_response>PONG</expected_response>
        <timeout_ms>500</timeout_ms>
      </test>
      <stop>
        <command>BYE</command>
        <expected_response>OK</expected_response>
        <timeout_ms>500</timeout_ms>
      </stop>
    </port>
  </uut>
</bib>"#,
    )
}

pub fn write_config(dir: &std::path::Path, xml: &str) -> PathBuf {
    let path = dir.join("bench.xml");
    std::fs::write(&path, xml).expect("write config");
    path
}
