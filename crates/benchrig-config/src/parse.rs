use std::collections::HashMap;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use benchrig_model::{
    parse_regex_options, BibDefinition, CommandDefinition, CommandSequence, Error, PortDefinition,
    RegexOptions, ResponseMatcher, UutDefinition,
};

/// Result of parsing one configuration document.
#[derive(Debug)]
pub struct ParsedConfig {
    pub bibs: Vec<BibDefinition>,
    /// Non-fatal findings: unknown regex options, unexpected elements.
    pub warnings: Vec<String>,
    pub element_count: usize,
    pub max_depth: usize,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::ConfigInvalid {
        reason: reason.into(),
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, Error> {
    for a in e.attributes() {
        let a = a.map_err(|err| invalid(format!("malformed attribute: {err}")))?;
        if a.key.local_name().as_ref() == name.as_bytes() {
            let value = a
                .unescape_value()
                .map_err(|err| invalid(format!("bad attribute value: {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_number<T: std::str::FromStr>(element: &str, text: &str) -> Result<T, Error> {
    text.trim()
        .parse()
        .map_err(|_| invalid(format!("<{element}> is not a valid number: '{}'", text.trim())))
}

#[derive(Debug, Default)]
struct PendingCommand {
    command: String,
    expected: Option<String>,
    is_regex: bool,
    options: RegexOptions,
    timeout: Duration,
    retry_count: u32,
}

impl PendingCommand {
    fn new(command: String) -> Self {
        PendingCommand {
            command,
            timeout: Duration::from_millis(2000),
            ..PendingCommand::default()
        }
    }

    fn into_definition(self) -> CommandDefinition {
        let (matcher, regex_error) =
            ResponseMatcher::from_expectation(self.expected, self.is_regex, &self.options);
        CommandDefinition {
            command: self.command,
            matcher,
            timeout: self.timeout,
            retry_count: self.retry_count,
            regex_validation_error: regex_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceKind {
    Start,
    Test,
    Stop,
}

#[derive(Debug)]
struct PortBuilder {
    index: u32,
    protocol: String,
    speed: u32,
    data_pattern: String,
    read_timeout: Duration,
    write_timeout: Duration,
    settings: HashMap<String, String>,
    start: CommandSequence,
    test: CommandSequence,
    stop: CommandSequence,
}

impl PortBuilder {
    fn new(index: u32) -> Self {
        PortBuilder {
            index,
            protocol: "rs232".into(),
            speed: 115_200,
            data_pattern: "n81".into(),
            read_timeout: Duration::from_millis(3000),
            write_timeout: Duration::from_millis(3000),
            settings: HashMap::new(),
            start: CommandSequence::default(),
            test: CommandSequence::default(),
            stop: CommandSequence::default(),
        }
    }

    fn build(self) -> PortDefinition {
        PortDefinition {
            index: self.index,
            protocol: self.protocol,
            speed: self.speed,
            data_pattern: self.data_pattern,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            settings: self.settings,
            start_commands: self.start,
            test_commands: self.test,
            stop_commands: self.stop,
        }
    }
}

/// Parses a configuration document: either `<root>` containing one or more
/// `<bib>` elements, or a single `<bib>` as the document root.
///
/// Structural problems (missing required attributes, unparsable numbers,
/// malformed XML) fail the load. Schema-level rules such as duplicate port
/// numbers are checked separately by [`crate::validate_bibs`], and a regex
/// expectation that does not compile is recorded on the command rather than
/// failing the parse.
pub fn parse_bibs(xml: &str) -> Result<ParsedConfig, Error> {
    let mut reader = Reader::from_str(xml);

    let mut bibs: Vec<BibDefinition> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut element_count = 0usize;
    let mut depth = 0usize;
    let mut max_depth = 0usize;

    let mut cur_bib: Option<(String, String, HashMap<String, String>, Vec<UutDefinition>)> = None;
    let mut cur_uut: Option<(String, Vec<PortDefinition>)> = None;
    let mut cur_port: Option<PortBuilder> = None;
    let mut cur_seq: Option<(SequenceKind, Vec<PendingCommand>)> = None;
    let mut in_metadata = false;
    // Attributes of an <expected_response> whose body has not been read yet.
    let mut pending_expectation: Option<(bool, RegexOptions)> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|err| invalid(format!("XML parse error: {err}")))?;
        match event {
            Event::Start(e) => {
                element_count += 1;
                depth += 1;
                max_depth = max_depth.max(depth);
                text.clear();
                handle_open(
                    &e,
                    &mut cur_bib,
                    &mut cur_uut,
                    &mut cur_port,
                    &mut cur_seq,
                    &mut in_metadata,
                    &mut pending_expectation,
                    &mut warnings,
                )?;
            }
            Event::Empty(e) => {
                element_count += 1;
                max_depth = max_depth.max(depth + 1);
                text.clear();
                handle_open(
                    &e,
                    &mut cur_bib,
                    &mut cur_uut,
                    &mut cur_port,
                    &mut cur_seq,
                    &mut in_metadata,
                    &mut pending_expectation,
                    &mut warnings,
                )?;
                handle_close(
                    local_name(&e),
                    &mut text,
                    &mut bibs,
                    &mut cur_bib,
                    &mut cur_uut,
                    &mut cur_port,
                    &mut cur_seq,
                    &mut in_metadata,
                    &mut pending_expectation,
                    &mut warnings,
                )?;
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                handle_close(
                    name,
                    &mut text,
                    &mut bibs,
                    &mut cur_bib,
                    &mut cur_uut,
                    &mut cur_port,
                    &mut cur_seq,
                    &mut in_metadata,
                    &mut pending_expectation,
                    &mut warnings,
                )?;
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let chunk = t
                    .unescape()
                    .map_err(|err| invalid(format!("bad text content: {err}")))?;
                text.push_str(&chunk);
            }
            Event::CData(c) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if bibs.is_empty() {
        return Err(invalid("configuration contains no <bib> element"));
    }

    Ok(ParsedConfig {
        bibs,
        warnings,
        element_count,
        max_depth,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

#[allow(clippy::too_many_arguments)]
fn handle_open(
    e: &BytesStart<'_>,
    cur_bib: &mut Option<(String, String, HashMap<String, String>, Vec<UutDefinition>)>,
    cur_uut: &mut Option<(String, Vec<PortDefinition>)>,
    cur_port: &mut Option<PortBuilder>,
    cur_seq: &mut Option<(SequenceKind, Vec<PendingCommand>)>,
    in_metadata: &mut bool,
    pending_expectation: &mut Option<(bool, RegexOptions)>,
    warnings: &mut Vec<String>,
) -> Result<(), Error> {
    let name = local_name(e);
    match name.as_str() {
        "bib" => {
            if cur_bib.is_some() {
                return Err(invalid("nested <bib> elements are not allowed"));
            }
            let id = attr(e, "id")?.unwrap_or_default();
            let description = attr(e, "description")?.unwrap_or_default();
            *cur_bib = Some((id, description, HashMap::new(), Vec::new()));
        }
        "uut" => {
            if cur_bib.is_none() {
                return Err(invalid("<uut> outside of <bib>"));
            }
            let id = attr(e, "id")?.unwrap_or_default();
            *cur_uut = Some((id, Vec::new()));
        }
        "port" => {
            if cur_uut.is_none() {
                return Err(invalid("<port> outside of <uut>"));
            }
            let number = attr(e, "number")?
                .ok_or_else(|| invalid("<port> is missing the required 'number' attribute"))?;
            let index = parse_number::<u32>("port number", &number)?;
            *cur_port = Some(PortBuilder::new(index));
        }
        "metadata" if cur_bib.is_some() && cur_port.is_none() => {
            *in_metadata = true;
        }
        "start" | "test" | "stop" if cur_port.is_some() => {
            let kind = match name.as_str() {
                "start" => SequenceKind::Start,
                "test" => SequenceKind::Test,
                _ => SequenceKind::Stop,
            };
            *cur_seq = Some((kind, Vec::new()));
        }
        "expected_response" if cur_seq.is_some() => {
            let is_regex = attr(e, "regex")?
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            let options = match attr(e, "options")? {
                Some(raw) => {
                    let (options, option_warnings) = parse_regex_options(&raw);
                    warnings.extend(option_warnings);
                    options
                }
                None => RegexOptions::default(),
            };
            *pending_expectation = Some((is_regex, options));
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_close(
    name: String,
    text: &mut String,
    bibs: &mut Vec<BibDefinition>,
    cur_bib: &mut Option<(String, String, HashMap<String, String>, Vec<UutDefinition>)>,
    cur_uut: &mut Option<(String, Vec<PortDefinition>)>,
    cur_port: &mut Option<PortBuilder>,
    cur_seq: &mut Option<(SequenceKind, Vec<PendingCommand>)>,
    in_metadata: &mut bool,
    pending_expectation: &mut Option<(bool, RegexOptions)>,
    warnings: &mut Vec<String>,
) -> Result<(), Error> {
    let body = std::mem::take(text).trim().to_string();
    match name.as_str() {
        "bib" => {
            let (id, description, metadata, uuts) = cur_bib
                .take()
                .ok_or_else(|| invalid("unbalanced </bib>"))?;
            bibs.push(BibDefinition {
                id,
                description,
                metadata,
                uuts,
            });
        }
        "uut" => {
            let (id, ports) = cur_uut.take().ok_or_else(|| invalid("unbalanced </uut>"))?;
            if let Some((_, _, _, uuts)) = cur_bib.as_mut() {
                uuts.push(UutDefinition { id, ports });
            }
        }
        "port" => {
            let builder = cur_port
                .take()
                .ok_or_else(|| invalid("unbalanced </port>"))?;
            if let Some((_, ports)) = cur_uut.as_mut() {
                ports.push(builder.build());
            }
        }
        "metadata" if *in_metadata && cur_port.is_none() => {
            *in_metadata = false;
            if !body.is_empty() {
                if let Some((_, _, metadata, _)) = cur_bib.as_mut() {
                    metadata.insert("text".into(), body);
                }
            }
        }
        "start" | "test" | "stop" if cur_seq.is_some() => {
            let (kind, pending) = cur_seq.take().expect("sequence in progress");
            let sequence = CommandSequence {
                commands: pending.into_iter().map(PendingCommand::into_definition).collect(),
            };
            if let Some(port) = cur_port.as_mut() {
                match kind {
                    SequenceKind::Start => port.start = sequence,
                    SequenceKind::Test => port.test = sequence,
                    SequenceKind::Stop => port.stop = sequence,
                }
            }
        }
        "command" if cur_seq.is_some() => {
            if let Some((_, pending)) = cur_seq.as_mut() {
                pending.push(PendingCommand::new(body));
            }
        }
        "expected_response" if cur_seq.is_some() => {
            let (is_regex, options) = pending_expectation.take().unwrap_or_default();
            match cur_seq.as_mut().and_then(|(_, p)| p.last_mut()) {
                Some(last) => {
                    last.expected = Some(body);
                    last.is_regex = is_regex;
                    last.options = options;
                }
                None => warnings.push("<expected_response> with no preceding <command>".into()),
            }
        }
        "timeout_ms" if cur_seq.is_some() => {
            let ms = parse_number::<u64>("timeout_ms", &body)?;
            match cur_seq.as_mut().and_then(|(_, p)| p.last_mut()) {
                Some(last) => last.timeout = Duration::from_millis(ms),
                None => warnings.push("<timeout_ms> with no preceding <command>".into()),
            }
        }
        "retry_count" if cur_seq.is_some() => {
            let retries = parse_number::<u32>("retry_count", &body)?;
            match cur_seq.as_mut().and_then(|(_, p)| p.last_mut()) {
                Some(last) => last.retry_count = retries,
                None => warnings.push("<retry_count> with no preceding <command>".into()),
            }
        }
        "protocol" if cur_port.is_some() && cur_seq.is_none() => {
            cur_port.as_mut().expect("port in progress").protocol = body.to_ascii_lowercase();
        }
        "speed" if cur_port.is_some() && cur_seq.is_none() => {
            cur_port.as_mut().expect("port in progress").speed = parse_number("speed", &body)?;
        }
        "data_pattern" if cur_port.is_some() && cur_seq.is_none() => {
            cur_port.as_mut().expect("port in progress").data_pattern = body;
        }
        "read_timeout" if cur_port.is_some() && cur_seq.is_none() => {
            let ms = parse_number::<u64>("read_timeout", &body)?;
            cur_port.as_mut().expect("port in progress").read_timeout = Duration::from_millis(ms);
        }
        "write_timeout" if cur_port.is_some() && cur_seq.is_none() => {
            let ms = parse_number::<u64>("write_timeout", &body)?;
            cur_port.as_mut().expect("port in progress").write_timeout = Duration::from_millis(ms);
        }
        "root" => {}
        other => {
            if *in_metadata {
                if let Some((_, _, metadata, _)) = cur_bib.as_mut() {
                    metadata.insert(other.to_string(), body);
                }
            } else if let Some(port) = cur_port.as_mut() {
                if cur_seq.is_none() {
                    // Unmodeled port setting, preserved for the handler.
                    port.settings.insert(other.to_string(), body);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_BIB: &str = r#"
        <bib id="client_demo" description="demo bench">
          <metadata>
            <site>lab-2</site>
          </metadata>
          <uut id="u1">
            <port number="1">
              <protocol>rs232</protocol>
              <speed>115200</speed>
              <data_pattern>n81</data_pattern>
              <read_timeout>3000</read_timeout>
              <flow_control>none</flow_control>
              <start>
                <command>INIT</command>
                <expected_response>READY</expected_response>
                <timeout_ms>2000</timeout_ms>
                <retry_count>1</retry_count>
              </start>
              <test>
                <command>PING</command>
                <expected_response regex="true" options="IgnoreCase">^pong$</expected_response>
              </test>
              <stop>
                <command>BYE</command>
                <expected_response>OK</expected_response>
              </stop>
            </port>
          </uut>
        </bib>"#;

    #[test]
    fn parses_single_bib_root() {
        let parsed = parse_bibs(SINGLE_BIB).unwrap();
        assert_eq!(parsed.bibs.len(), 1);
        let bib = &parsed.bibs[0];
        assert_eq!(bib.id, "client_demo");
        assert_eq!(bib.description, "demo bench");
        assert_eq!(bib.metadata.get("site").map(String::as_str), Some("lab-2"));

        let port = &bib.uuts[0].ports[0];
        assert_eq!(port.index, 1);
        assert_eq!(port.protocol, "rs232");
        assert_eq!(port.speed, 115_200);
        assert_eq!(port.read_timeout, Duration::from_millis(3000));
        assert_eq!(port.settings.get("flow_control").map(String::as_str), Some("none"));

        let start = &port.start_commands.commands[0];
        assert_eq!(start.command, "INIT");
        assert_eq!(start.timeout, Duration::from_millis(2000));
        assert_eq!(start.retry_count, 1);
        assert!(matches!(start.matcher, ResponseMatcher::Literal(ref s) if s == "READY"));

        let test = &port.test_commands.commands[0];
        match &test.matcher {
            ResponseMatcher::Regex { compiled, .. } => assert!(compiled.is_match("PONG")),
            other => panic!("expected regex matcher, got {other:?}"),
        }
    }

    #[test]
    fn parses_multi_bib_root() {
        let xml = r#"
          <root>
            <bib id="bench_a"><uut id="u1"><port number="1"/></uut></bib>
            <bib id="bench_b"><uut id="u1"><port number="1"/></uut></bib>
          </root>"#;
        let parsed = parse_bibs(xml).unwrap();
        assert_eq!(parsed.bibs.len(), 2);
        assert_eq!(parsed.bibs[0].id, "bench_a");
        assert_eq!(parsed.bibs[1].id, "bench_b");
        // Self-closing ports get the defaults.
        assert_eq!(parsed.bibs[0].uuts[0].ports[0].protocol, "rs232");
    }

    #[test]
    fn invalid_regex_is_recorded_not_fatal() {
        let xml = r#"
          <bib id="bench_a"><uut id="u1"><port number="1">
            <test>
              <command>PING</command>
              <expected_response regex="true">(unclosed</expected_response>
            </test>
          </port></uut></bib>"#;
        let parsed = parse_bibs(xml).unwrap();
        let cmd = &parsed.bibs[0].uuts[0].ports[0].test_commands.commands[0];
        assert!(cmd.regex_validation_error.is_some());
        assert!(matches!(cmd.matcher, ResponseMatcher::Literal(ref s) if s == "(unclosed"));
    }

    #[test]
    fn unknown_regex_option_warns() {
        let xml = r#"
          <bib id="bench_a"><uut id="u1"><port number="1">
            <test>
              <command>PING</command>
              <expected_response regex="true" options="IgnoreCase,Bogus">ok</expected_response>
            </test>
          </port></uut></bib>"#;
        let parsed = parse_bibs(xml).unwrap();
        assert!(parsed.warnings.iter().any(|w| w.contains("Bogus")));
    }

    #[test]
    fn missing_port_number_fails() {
        let xml = r#"<bib id="b1"><uut id="u1"><port/></uut></bib>"#;
        let err = parse_bibs(xml).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn garbage_number_fails() {
        let xml = r#"<bib id="b1"><uut id="u1"><port number="1"><speed>fast</speed></port></uut></bib>"#;
        assert!(parse_bibs(xml).is_err());
    }

    #[test]
    fn no_bib_fails() {
        assert!(parse_bibs("<root></root>").is_err());
    }
}
