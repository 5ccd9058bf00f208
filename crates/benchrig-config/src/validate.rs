use std::collections::HashSet;

use benchrig_model::BibDefinition;

/// Protocol tags the core recognizes. An unrecognized tag is a warning, not
/// an error, so configurations can stage protocols ahead of handler
/// support.
pub const RECOGNIZED_PROTOCOLS: &[&str] = &["rs232", "rs485", "usb", "can", "i2c", "spi"];

/// Standard baud rates for serial protocols; off-list speeds warn.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200, 230_400, 460_800,
    921_600,
];

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ELEMENTS: usize = 1000;
const MAX_DEPTH: usize = 10;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Schema-level validation of a parsed configuration tree.
pub fn validate_bibs(bibs: &[BibDefinition]) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut seen_bibs = HashSet::new();
    for bib in bibs {
        if bib.id.trim().is_empty() {
            report.error("<bib> element has an empty 'id'");
            continue;
        }
        if !seen_bibs.insert(bib.id.as_str()) {
            report.error(format!("duplicate BIB id '{}'", bib.id));
        }
        if bib.uuts.is_empty() {
            report.error(format!("BIB '{}' contains no UUT", bib.id));
        }
        for uut in &bib.uuts {
            if uut.id.trim().is_empty() {
                report.error(format!("UUT in BIB '{}' has an empty 'id'", bib.id));
                continue;
            }
            if uut.ports.is_empty() {
                report.error(format!("UUT '{}' in BIB '{}' has no ports", uut.id, bib.id));
            }
            let mut seen_ports = HashSet::new();
            for port in &uut.ports {
                if port.index == 0 {
                    report.error(format!(
                        "port number must be positive (UUT '{}' in BIB '{}')",
                        uut.id, bib.id
                    ));
                }
                if !seen_ports.insert(port.index) {
                    report.error(format!(
                        "duplicate port number {} in UUT '{}' of BIB '{}'",
                        port.index, uut.id, bib.id
                    ));
                }
                if !RECOGNIZED_PROTOCOLS.contains(&port.protocol.as_str()) {
                    report.warn(format!(
                        "unrecognized protocol '{}' on port {} of UUT '{}'",
                        port.protocol, port.index, uut.id
                    ));
                }
                let serial = matches!(port.protocol.as_str(), "rs232" | "rs485");
                if serial && !STANDARD_BAUD_RATES.contains(&port.speed) {
                    report.warn(format!(
                        "non-standard baud rate {} on port {} of UUT '{}'",
                        port.speed, port.index, uut.id
                    ));
                }
            }
        }
    }

    report
}

/// Size/complexity advisories for a loaded file. Always warnings.
pub fn validate_limits(
    file_size: u64,
    element_count: usize,
    max_depth: usize,
    report: &mut ValidationReport,
) {
    if file_size > MAX_FILE_SIZE {
        report.warn(format!(
            "configuration file is {file_size} bytes (limit {MAX_FILE_SIZE})"
        ));
    }
    if element_count > MAX_ELEMENTS {
        report.warn(format!(
            "configuration has {element_count} elements (limit {MAX_ELEMENTS})"
        ));
    }
    if max_depth > MAX_DEPTH {
        report.warn(format!(
            "configuration nests {max_depth} levels deep (limit {MAX_DEPTH})"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_bibs;

    #[test]
    fn valid_tree_passes() {
        let parsed = parse_bibs(
            r#"<bib id="bench_a"><uut id="u1"><port number="1"/><port number="2"/></uut></bib>"#,
        )
        .unwrap();
        let report = validate_bibs(&parsed.bibs);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn empty_bib_id_is_an_error() {
        let parsed = parse_bibs(r#"<bib><uut id="u1"><port number="1"/></uut></bib>"#).unwrap();
        let report = validate_bibs(&parsed.bibs);
        assert!(!report.is_valid());
    }

    #[test]
    fn duplicate_port_numbers_are_an_error() {
        let parsed = parse_bibs(
            r#"<bib id="bench_a"><uut id="u1"><port number="3"/><port number="3"/></uut></bib>"#,
        )
        .unwrap();
        let report = validate_bibs(&parsed.bibs);
        assert!(report.errors.iter().any(|e| e.contains("duplicate port number 3")));
    }

    #[test]
    fn duplicate_bib_ids_are_an_error() {
        let parsed = parse_bibs(
            r#"<root>
                 <bib id="same"><uut id="u1"><port number="1"/></uut></bib>
                 <bib id="same"><uut id="u1"><port number="1"/></uut></bib>
               </root>"#,
        )
        .unwrap();
        let report = validate_bibs(&parsed.bibs);
        assert!(report.errors.iter().any(|e| e.contains("duplicate BIB id")));
    }

    #[test]
    fn unknown_protocol_and_odd_baud_warn_only() {
        let parsed = parse_bibs(
            r#"<bib id="bench_a"><uut id="u1"><port number="1">
                 <protocol>lin</protocol>
               </port><port number="2">
                 <protocol>rs232</protocol><speed>123456</speed>
               </port></uut></bib>"#,
        )
        .unwrap();
        let report = validate_bibs(&parsed.bibs);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn limits_warn_not_error() {
        let mut report = ValidationReport::default();
        validate_limits(20 * 1024 * 1024, 5000, 12, &mut report);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 3);
    }
}
