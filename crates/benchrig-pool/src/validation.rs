use benchrig_model::{ChipFamily, PortDescriptor};

/// Filter applied to discovered ports before allocation.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Reject non-FTDI bridges outright.
    pub require_ftdi: bool,
    /// When non-empty, only these chip families pass.
    pub required_families: Vec<ChipFamily>,
    pub min_score: u8,
    pub require_pool_suitable: bool,
}

impl ValidationConfig {
    /// Strict client profile: FTDI quad-channel bridges only, high score.
    pub fn strict_client() -> Self {
        ValidationConfig {
            require_ftdi: true,
            required_families: vec![ChipFamily::Ft4232h, ChipFamily::Ft4232ha],
            min_score: 80,
            require_pool_suitable: true,
        }
    }

    /// Accepts anything the enumerator marked pool-suitable.
    pub fn permissive() -> Self {
        ValidationConfig {
            require_ftdi: false,
            required_families: Vec::new(),
            min_score: 0,
            require_pool_suitable: true,
        }
    }

    pub fn with_min_score(mut self, min_score: u8) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn accepts(&self, descriptor: &PortDescriptor) -> bool {
        if self.require_pool_suitable && !descriptor.is_pool_suitable {
            return false;
        }
        if self.require_ftdi && !descriptor.is_ftdi() {
            return false;
        }
        if !self.required_families.is_empty()
            && !self.required_families.contains(&descriptor.chip_family)
        {
            return false;
        }
        descriptor.validation_score >= self.min_score
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig::permissive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(family: ChipFamily, score: u8, suitable: bool) -> PortDescriptor {
        PortDescriptor {
            port_name: "COM3".into(),
            device_id: "dev".into(),
            vendor_product: "0403:6011".into(),
            chip_family: family,
            bridge_serial: Some("FT0000".into()),
            friendly_name: "test".into(),
            is_pool_suitable: suitable,
            validation_score: score,
            validation_reason: String::new(),
        }
    }

    #[test]
    fn strict_profile_rejects_non_quad_ftdi() {
        let strict = ValidationConfig::strict_client();
        assert!(strict.accepts(&descriptor(ChipFamily::Ft4232h, 90, true)));
        assert!(!strict.accepts(&descriptor(ChipFamily::Ft232r, 90, true)));
        assert!(!strict.accepts(&descriptor(ChipFamily::Cp210x, 90, true)));
        assert!(!strict.accepts(&descriptor(ChipFamily::Ft4232h, 50, true)));
    }

    #[test]
    fn permissive_profile_only_requires_pool_suitability() {
        let permissive = ValidationConfig::permissive();
        assert!(permissive.accepts(&descriptor(ChipFamily::Ch340, 10, true)));
        assert!(!permissive.accepts(&descriptor(ChipFamily::Ch340, 10, false)));
    }
}
