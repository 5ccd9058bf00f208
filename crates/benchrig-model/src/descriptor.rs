use std::collections::HashMap;
use std::time::SystemTime;

/// Chip family of a USB-to-serial bridge, as reported by the enumerator.
///
/// The family drives two decisions: whether a port is eligible for strict
/// client pools (FTDI-only), and how many sibling ports the grouper expects
/// to find on the same bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    Ft232r,
    Ft2232h,
    Ft4232h,
    /// Automotive variant of the FT4232H; same channel layout.
    Ft4232ha,
    FtX,
    Cp210x,
    Ch340,
    Unknown(String),
}

impl ChipFamily {
    /// Number of logical serial channels the bridge exposes.
    pub fn expected_port_count(&self) -> usize {
        match self {
            ChipFamily::Ft4232h | ChipFamily::Ft4232ha => 4,
            ChipFamily::Ft2232h => 2,
            _ => 1,
        }
    }

    pub fn is_ftdi(&self) -> bool {
        matches!(
            self,
            ChipFamily::Ft232r
                | ChipFamily::Ft2232h
                | ChipFamily::Ft4232h
                | ChipFamily::Ft4232ha
                | ChipFamily::FtX
        )
    }

    /// Parses an enumerator-provided tag such as `"FT4232H"` or `"CP2102"`.
    pub fn from_tag(tag: &str) -> Self {
        let upper = tag.trim().to_ascii_uppercase();
        match upper.as_str() {
            "FT232R" | "FT232RL" => ChipFamily::Ft232r,
            "FT2232H" | "FT2232" => ChipFamily::Ft2232h,
            "FT4232H" | "FT4232" => ChipFamily::Ft4232h,
            "FT4232HA" => ChipFamily::Ft4232ha,
            "FT-X" | "FTX" | "FT230X" | "FT231X" => ChipFamily::FtX,
            s if s.starts_with("CP210") => ChipFamily::Cp210x,
            s if s.starts_with("CH340") || s.starts_with("CH341") => ChipFamily::Ch340,
            _ => ChipFamily::Unknown(tag.trim().to_string()),
        }
    }
}

impl std::fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChipFamily::Ft232r => write!(f, "FT232R"),
            ChipFamily::Ft2232h => write!(f, "FT2232H"),
            ChipFamily::Ft4232h => write!(f, "FT4232H"),
            ChipFamily::Ft4232ha => write!(f, "FT4232HA"),
            ChipFamily::FtX => write!(f, "FT-X"),
            ChipFamily::Cp210x => write!(f, "CP210x"),
            ChipFamily::Ch340 => write!(f, "CH340"),
            ChipFamily::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// One physical serial port as seen by the enumerator.
///
/// Immutable after construction; rediscovery replaces the descriptor
/// wholesale rather than mutating it in place.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    /// OS port name, e.g. `COM7` or `/dev/ttyUSB3`.
    pub port_name: String,
    /// Stable device identity string (bus path / instance id).
    pub device_id: String,
    /// USB vendor:product identifier, e.g. `0403:6011`.
    pub vendor_product: String,
    pub chip_family: ChipFamily,
    /// Serial number of the parent bridge; shared by sibling ports.
    pub bridge_serial: Option<String>,
    pub friendly_name: String,
    /// Whether the enumerator considers the port eligible for pooling.
    pub is_pool_suitable: bool,
    /// Validation score 0-100 assigned by the enumerator's heuristics.
    pub validation_score: u8,
    pub validation_reason: String,
}

impl PortDescriptor {
    pub fn is_ftdi(&self) -> bool {
        self.chip_family.is_ftdi()
    }

    /// Base device identifier: the first path segment after the bus prefix
    /// (vendor/product ids plus the bridge serial), e.g.
    /// `VID_0403+PID_6011+FT9A2B3CA` out of
    /// `FTDIBUS\VID_0403+PID_6011+FT9A2B3CA\0000`.
    pub fn base_device_id(&self) -> &str {
        let rest = match self.device_id.split_once('\\') {
            Some((_, rest)) => rest,
            None => self.device_id.as_str(),
        };
        rest.split('\\').next().unwrap_or(rest)
    }
}

/// Cached EEPROM-derived metadata for one port.
#[derive(Debug, Clone)]
pub struct HardwareMetadata {
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    /// The `ProductDescription` string programmed into the bridge EEPROM;
    /// used as the dynamic BIB identifier.
    pub product_description: Option<String>,
    pub firmware_revision: Option<String>,
    pub hardware_revision: Option<String>,
    pub eeprom: HashMap<String, String>,
    pub read_at: SystemTime,
    pub is_valid: bool,
    pub error: Option<String>,
}

impl HardwareMetadata {
    /// Placeholder recorded when the underlying read fails; callers see an
    /// invalid entry instead of an error.
    pub fn invalid(error: impl Into<String>) -> Self {
        HardwareMetadata {
            serial_number: None,
            manufacturer: None,
            product_description: None,
            firmware_revision: None,
            hardware_revision: None,
            eeprom: HashMap::new(),
            read_at: SystemTime::now(),
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// All ports that share one physical USB-to-serial bridge.
#[derive(Debug, Clone)]
pub struct DeviceGroup {
    /// Grouping key: `"<vendor>_<serial>"`, the base device id, or
    /// `"SINGLE_<port>"` for ports that could not be grouped.
    pub key: String,
    pub ports: Vec<PortDescriptor>,
    pub chip_family: ChipFamily,
    pub is_multi_port: bool,
}

impl DeviceGroup {
    /// Bridge serial number shared by the group's ports, when known.
    pub fn shared_serial(&self) -> Option<&str> {
        self.ports.iter().find_map(|p| p.bridge_serial.as_deref())
    }

    /// Whether every channel the chip family advertises was discovered.
    pub fn is_complete(&self) -> bool {
        self.ports.len() >= self.chip_family.expected_port_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_family_port_counts() {
        assert_eq!(ChipFamily::Ft4232h.expected_port_count(), 4);
        assert_eq!(ChipFamily::Ft2232h.expected_port_count(), 2);
        assert_eq!(ChipFamily::Ft232r.expected_port_count(), 1);
        assert_eq!(ChipFamily::Cp210x.expected_port_count(), 1);
    }

    #[test]
    fn chip_family_from_tag() {
        assert_eq!(ChipFamily::from_tag("FT4232H"), ChipFamily::Ft4232h);
        assert_eq!(ChipFamily::from_tag("ft232r"), ChipFamily::Ft232r);
        assert_eq!(ChipFamily::from_tag("CP2102"), ChipFamily::Cp210x);
        assert_eq!(
            ChipFamily::from_tag("PL2303"),
            ChipFamily::Unknown("PL2303".into())
        );
    }

    #[test]
    fn base_device_id_takes_segment_after_bus_prefix() {
        let d = PortDescriptor {
            port_name: "COM7".into(),
            device_id: r"FTDIBUS\VID_0403+PID_6011+FT9A2B3CA\0000".into(),
            vendor_product: "0403:6011".into(),
            chip_family: ChipFamily::Ft4232h,
            bridge_serial: None,
            friendly_name: "quad bridge A".into(),
            is_pool_suitable: true,
            validation_score: 90,
            validation_reason: "ftdi".into(),
        };
        assert_eq!(d.base_device_id(), "VID_0403+PID_6011+FT9A2B3CA");
    }
}
