use async_trait::async_trait;

use benchrig_model::PortDescriptor;

/// OS-specific hardware enumeration, provided by the host.
#[async_trait]
pub trait PortEnumerator: Send + Sync {
    /// All serial ports currently present.
    async fn discover(&self) -> Vec<PortDescriptor>;

    /// Descriptor for one port, if present.
    async fn info(&self, port_name: &str) -> Option<PortDescriptor>;
}

/// Raw EEPROM contents of a USB-to-serial bridge.
#[derive(Debug, Clone)]
pub struct EepromData {
    pub product_description: String,
    pub manufacturer: Option<String>,
    /// Arbitrary key/value pairs read from the EEPROM user area.
    pub fields: Vec<(String, String)>,
    pub is_valid: bool,
    pub error: Option<String>,
}

impl EepromData {
    pub fn valid(product_description: impl Into<String>) -> Self {
        EepromData {
            product_description: product_description.into(),
            manufacturer: None,
            fields: Vec::new(),
            is_valid: true,
            error: None,
        }
    }

    pub fn unreadable(error: impl Into<String>) -> Self {
        EepromData {
            product_description: String::new(),
            manufacturer: None,
            fields: Vec::new(),
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Vendor EEPROM access, provided by the host.
#[async_trait]
pub trait EepromReader: Send + Sync {
    /// Reads the EEPROM of the bridge with the given serial number. A
    /// failed read is reported in-band via [`EepromData::is_valid`].
    async fn read(&self, serial_number: &str) -> EepromData;

    async fn is_accessible(&self, serial_number: &str) -> bool;
}
