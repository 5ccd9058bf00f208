use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use benchrig_model::{Error, PortDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Wire parameters for one session, decoded from a [`PortDefinition`].
#[derive(Debug, Clone)]
pub struct WireSettings {
    pub port_name: String,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

/// Decodes a data-pattern code such as `n81` (no parity, 8 data bits,
/// 1 stop bit) or `e72`.
fn parse_data_pattern(pattern: &str) -> Result<(Parity, u8, u8), String> {
    let chars: Vec<char> = pattern.trim().chars().collect();
    if chars.len() != 3 {
        return Err(format!("data pattern '{pattern}' is not <parity><data><stop>"));
    }
    let parity = match chars[0].to_ascii_lowercase() {
        'n' => Parity::None,
        'e' => Parity::Even,
        'o' => Parity::Odd,
        other => return Err(format!("unknown parity '{other}' in data pattern '{pattern}'")),
    };
    let data_bits = match chars[1] {
        '5'..='8' => chars[1] as u8 - b'0',
        other => return Err(format!("unsupported data bits '{other}' in '{pattern}'")),
    };
    let stop_bits = match chars[2] {
        '1' | '2' => chars[2] as u8 - b'0',
        other => return Err(format!("unsupported stop bits '{other}' in '{pattern}'")),
    };
    Ok((parity, data_bits, stop_bits))
}

/// Builds the wire settings for opening `port_name` with the parameters of
/// a port definition.
pub fn wire_settings_for(port_name: &str, port: &PortDefinition) -> Result<WireSettings, Error> {
    let (parity, data_bits, stop_bits) =
        parse_data_pattern(&port.data_pattern).map_err(|reason| Error::SessionOpenFailed {
            port_name: port_name.to_string(),
            reason,
        })?;
    Ok(WireSettings {
        port_name: port_name.to_string(),
        baud: port.speed,
        data_bits,
        parity,
        stop_bits,
        read_timeout: port.read_timeout,
        write_timeout: port.write_timeout,
    })
}

/// Byte-level wire access for one port. No framing: the handler decides
/// what a response is.
///
/// Implementations return promptly on cancellation (an empty chunk for
/// reads); the caller owns the interpretation.
#[async_trait]
pub trait WireTransport: Send {
    async fn open(&mut self, settings: &WireSettings) -> Result<(), Error>;

    async fn write_all(&mut self, bytes: &[u8], token: &CancellationToken) -> Result<(), Error>;

    /// Reads whatever arrives within `max_wait`; an empty chunk means
    /// nothing arrived in time.
    async fn read_chunk(
        &mut self,
        max_wait: Duration,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, Error>;

    async fn close(&mut self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_common_patterns() {
        assert_eq!(parse_data_pattern("n81"), Ok((Parity::None, 8, 1)));
        assert_eq!(parse_data_pattern("E72"), Ok((Parity::Even, 7, 2)));
        assert_eq!(parse_data_pattern("o61"), Ok((Parity::Odd, 6, 1)));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(parse_data_pattern("n8").is_err());
        assert!(parse_data_pattern("x81").is_err());
        assert!(parse_data_pattern("n91").is_err());
        assert!(parse_data_pattern("n83").is_err());
        assert!(parse_data_pattern("").is_err());
    }
}
