use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use benchrig_model::Error;

use crate::{PortAllocation, PortPool, ValidationConfig};

/// What a client asks the reservation layer for.
#[derive(Debug, Clone)]
pub struct ReservationCriteria {
    pub validation: ValidationConfig,
    /// Port to try first when it qualifies; any qualifying port otherwise.
    pub preferred_port: Option<String>,
    pub default_duration: Duration,
}

impl Default for ReservationCriteria {
    fn default() -> Self {
        ReservationCriteria {
            validation: ValidationConfig::permissive(),
            preferred_port: None,
            default_duration: Duration::from_secs(30 * 60),
        }
    }
}

/// A time-bounded, client-owned lease over a port allocation.
///
/// Instances handed to callers are snapshots; [`PortReservation::is_active`]
/// is wall-clock accurate the moment the lease expires, independent of the
/// background sweep that eventually frees the underlying allocation.
#[derive(Debug, Clone)]
pub struct PortReservation {
    pub reservation_id: Uuid,
    pub client_id: String,
    pub allocation: PortAllocation,
    pub duration: Duration,
    pub reserved_at: SystemTime,
    pub expires_at: Instant,
}

impl PortReservation {
    pub fn port_name(&self) -> &str {
        &self.allocation.port_name
    }

    pub fn is_active(&self) -> bool {
        Instant::now() < self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReservationServiceConfig {
    pub sweep_period: Duration,
}

impl Default for ReservationServiceConfig {
    fn default() -> Self {
        ReservationServiceConfig {
            sweep_period: Duration::from_secs(5 * 60),
        }
    }
}

struct ServiceInner {
    pool: Arc<PortPool>,
    config: ReservationServiceConfig,
    reservations: Mutex<HashMap<Uuid, PortReservation>>,
    token: CancellationToken,
}

/// Lease semantics over [`PortPool`].
///
/// The pool knows nothing about reservations; a reservation holds its
/// allocation by value and releasing the reservation releases the
/// allocation. Expired leases are freed by the periodic sweep (and
/// opportunistically on every `reserve` call).
#[derive(Clone)]
pub struct ReservationService {
    inner: Arc<ServiceInner>,
}

impl ReservationService {
    pub fn new(pool: Arc<PortPool>, config: ReservationServiceConfig) -> Self {
        ReservationService {
            inner: Arc::new(ServiceInner {
                pool,
                config,
                reservations: Mutex::new(HashMap::new()),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Reserves a qualifying port for `client_id`. `duration` falls back to
    /// the criteria's default.
    pub async fn reserve(
        &self,
        criteria: &ReservationCriteria,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Option<PortReservation> {
        self.sweep_expired();

        let allocation = self
            .inner
            .pool
            .allocate_preferring(criteria.preferred_port.as_deref(), &criteria.validation, client_id)
            .await?;

        let duration = duration.unwrap_or(criteria.default_duration);
        let reservation = PortReservation {
            reservation_id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            allocation,
            duration,
            reserved_at: SystemTime::now(),
            expires_at: Instant::now() + duration,
        };
        info!(
            reservation = %reservation.reservation_id,
            port = %reservation.port_name(),
            client = %client_id,
            duration_ms = duration.as_millis() as u64,
            "port reserved"
        );
        self.inner
            .reservations
            .lock()
            .insert(reservation.reservation_id, reservation.clone());
        Some(reservation)
    }

    /// [`ReservationService::reserve`] for callers that treat an empty pool
    /// as an error.
    pub async fn reserve_required(
        &self,
        criteria: &ReservationCriteria,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Result<PortReservation, Error> {
        self.reserve(criteria, client_id, duration)
            .await
            .ok_or(Error::PortNotAvailable)
    }

    /// Releases a reservation owned by `client_id` and frees the underlying
    /// allocation. `Ok(false)` when the id is unknown (already released or
    /// swept).
    pub fn release(&self, reservation_id: Uuid, client_id: &str) -> Result<bool, Error> {
        let mut table = self.inner.reservations.lock();
        let Some(reservation) = table.get(&reservation_id) else {
            return Ok(false);
        };
        if reservation.client_id != client_id {
            return Err(Error::ReservationOwnerMismatch {
                reservation_id,
                client_id: client_id.to_string(),
            });
        }
        let reservation = table.remove(&reservation_id).expect("entry just observed");
        drop(table);
        self.inner.pool.release(
            &reservation.allocation.port_name,
            reservation.allocation.session_id,
        );
        info!(reservation = %reservation_id, port = %reservation.port_name(), "reservation released");
        Ok(true)
    }

    /// Extends an unexpired reservation. `Ok(false)` when the id is
    /// unknown.
    pub fn extend(
        &self,
        reservation_id: Uuid,
        additional: Duration,
        client_id: &str,
    ) -> Result<bool, Error> {
        let mut table = self.inner.reservations.lock();
        let Some(reservation) = table.get_mut(&reservation_id) else {
            return Ok(false);
        };
        if reservation.client_id != client_id {
            return Err(Error::ReservationOwnerMismatch {
                reservation_id,
                client_id: client_id.to_string(),
            });
        }
        if !reservation.is_active() {
            return Err(Error::ReservationExpired { reservation_id });
        }
        reservation.expires_at += additional;
        reservation.duration += additional;
        debug!(reservation = %reservation_id, additional_ms = additional.as_millis() as u64, "reservation extended");
        Ok(true)
    }

    /// Best-effort release of everything `client_id` holds; returns how
    /// many reservations were freed.
    pub fn release_all_for_client(&self, client_id: &str) -> usize {
        let mut table = self.inner.reservations.lock();
        let ids: Vec<Uuid> = table
            .values()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.reservation_id)
            .collect();
        let mut released = 0;
        for id in &ids {
            if let Some(reservation) = table.remove(id) {
                self.inner.pool.release(
                    &reservation.allocation.port_name,
                    reservation.allocation.session_id,
                );
                released += 1;
            }
        }
        released
    }

    /// Whether the reservation exists and has not expired.
    pub fn is_active(&self, reservation_id: Uuid) -> bool {
        self.inner
            .reservations
            .lock()
            .get(&reservation_id)
            .map(|r| r.is_active())
            .unwrap_or(false)
    }

    pub fn active_reservations(&self) -> Vec<PortReservation> {
        self.inner
            .reservations
            .lock()
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Frees expired leases and their allocations; returns how many.
    pub fn sweep_expired(&self) -> usize {
        let mut table = self.inner.reservations.lock();
        let expired: Vec<Uuid> = table
            .values()
            .filter(|r| !r.is_active())
            .map(|r| r.reservation_id)
            .collect();
        for id in &expired {
            if let Some(reservation) = table.remove(id) {
                self.inner.pool.release(
                    &reservation.allocation.port_name,
                    reservation.allocation.session_id,
                );
                info!(reservation = %id, port = %reservation.port_name(), "expired reservation swept");
            }
        }
        expired.len()
    }

    /// Starts the periodic expiry sweep; runs until shutdown.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = service.inner.token.cancelled() => break,
                    _ = tokio::time::sleep(service.inner.config.sweep_period) => {
                        service.sweep_expired();
                    }
                }
            }
        })
    }

    /// Stops the sweeper and releases every outstanding reservation.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
        let mut table = self.inner.reservations.lock();
        for (_, reservation) in table.drain() {
            self.inner.pool.release(
                &reservation.allocation.port_name,
                reservation.allocation.session_id,
            );
        }
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
