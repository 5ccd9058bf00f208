#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use benchrig_model::{ChipFamily, PortDescriptor};
use benchrig_pool::{EepromData, EepromReader, PortEnumerator};

pub fn descriptor(port: &str, family: ChipFamily, serial: &str) -> PortDescriptor {
    PortDescriptor {
        port_name: port.into(),
        device_id: format!(r"FTDIBUS\VID_0403+PID_6011+{serial}\0000"),
        vendor_product: "0403:6011".into(),
        chip_family: family,
        bridge_serial: Some(serial.into()),
        friendly_name: format!("bridge on {port}"),
        is_pool_suitable: true,
        validation_score: 90,
        validation_reason: "ftdi bridge".into(),
    }
}

/// Enumerator over a fixed (but mutable) port table.
#[derive(Default)]
pub struct FakeEnumerator {
    ports: Mutex<Vec<PortDescriptor>>,
}

impl FakeEnumerator {
    pub fn with_ports(ports: Vec<PortDescriptor>) -> Self {
        FakeEnumerator {
            ports: Mutex::new(ports),
        }
    }

    pub fn set_ports(&self, ports: Vec<PortDescriptor>) {
        *self.ports.lock().unwrap() = ports;
    }
}

#[async_trait]
impl PortEnumerator for FakeEnumerator {
    async fn discover(&self) -> Vec<PortDescriptor> {
        self.ports.lock().unwrap().clone()
    }

    async fn info(&self, port_name: &str) -> Option<PortDescriptor> {
        self.ports
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.port_name == port_name)
            .cloned()
    }
}

/// EEPROM reader over a serial-number-keyed table, counting reads.
#[derive(Default)]
pub struct FakeEeprom {
    by_serial: Mutex<HashMap<String, EepromData>>,
    reads: AtomicU64,
    /// Artificial per-read latency, for tests that need a read to stay
    /// in flight.
    delay: Mutex<Option<std::time::Duration>>,
}

impl FakeEeprom {
    pub fn with_descriptor(serial: &str, product_description: &str) -> Self {
        let fake = FakeEeprom::default();
        fake.set(serial, EepromData::valid(product_description));
        fake
    }

    pub fn set(&self, serial: &str, data: EepromData) {
        self.by_serial.lock().unwrap().insert(serial.into(), data);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl EepromReader for FakeEeprom {
    async fn read(&self, serial_number: &str) -> EepromData {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.by_serial
            .lock()
            .unwrap()
            .get(serial_number)
            .cloned()
            .unwrap_or_else(|| EepromData::unreadable(format!("no EEPROM for {serial_number}")))
    }

    async fn is_accessible(&self, serial_number: &str) -> bool {
        self.by_serial.lock().unwrap().contains_key(serial_number)
    }
}
