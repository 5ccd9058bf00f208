use std::collections::HashMap;

use tracing::warn;

use benchrig_model::{DeviceGroup, PortDescriptor};

fn group_key(descriptor: &PortDescriptor) -> String {
    // Any bridge reporting a genuine serial number keys by vendor+serial,
    // regardless of chip family; sibling channels share the serial even
    // when their device-id path segments differ across driver versions.
    if let Some(serial) = descriptor.bridge_serial.as_deref() {
        if !serial.is_empty() {
            let vendor = descriptor.vendor_product.split(':').next().unwrap_or("");
            if !vendor.is_empty() {
                return format!("{vendor}_{serial}");
            }
        }
    }
    let base = descriptor.base_device_id();
    if !base.is_empty() {
        return base.to_string();
    }
    format!("SINGLE_{}", descriptor.port_name)
}

/// Clusters sibling ports that share one physical bridge.
///
/// Key priority: genuine vendor device with a serial number, then the base
/// device identifier, then a per-port singleton key. A group is multi-port
/// when it holds more than one descriptor or when its chip family is known
/// to expose several channels; if the family implies more channels than
/// were discovered, the group is still returned with a warning.
pub fn group_ports(descriptors: &[PortDescriptor]) -> Vec<DeviceGroup> {
    let mut buckets: Vec<(String, Vec<PortDescriptor>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for descriptor in descriptors {
        let key = group_key(descriptor);
        match index.get(&key) {
            Some(&i) => buckets[i].1.push(descriptor.clone()),
            None => {
                index.insert(key.clone(), buckets.len());
                buckets.push((key, vec![descriptor.clone()]));
            }
        }
    }

    buckets
        .into_iter()
        .map(|(key, mut ports)| {
            ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
            let chip_family = ports[0].chip_family.clone();
            let expected = chip_family.expected_port_count();
            let is_multi_port = ports.len() > 1 || expected > 1;
            if expected > ports.len() {
                warn!(
                    key = %key,
                    family = %chip_family,
                    expected,
                    found = ports.len(),
                    "multi-channel bridge is missing ports"
                );
            }
            DeviceGroup {
                key,
                ports,
                chip_family,
                is_multi_port,
            }
        })
        .collect()
}
