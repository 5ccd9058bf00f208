//! Port discovery, identity resolution, and leased exclusive allocation.
//!
//! The chain runs enumerator → metadata cache → grouper → BIB resolver for
//! identity, and enumerator → validator → pool → reservations for
//! allocation. Hardware access happens only through the
//! [`PortEnumerator`] and [`EepromReader`] capability traits, so everything
//! here is testable with in-memory fakes.

mod capability;
mod cache;
mod group;
mod pool;
mod reservation;
mod resolver;
mod validation;

pub use capability::{EepromData, EepromReader, PortEnumerator};
pub use cache::{CacheStats, MetadataCache, MetadataCacheConfig};
pub use group::group_ports;
pub use pool::{PoolStats, PortAllocation, PortPool};
pub use reservation::{
    PortReservation, ReservationCriteria, ReservationService, ReservationServiceConfig,
};
pub use resolver::{BibResolver, BibResolverConfig, PortMapping, ResolverStats, UutMapping};
pub use validation::ValidationConfig;
