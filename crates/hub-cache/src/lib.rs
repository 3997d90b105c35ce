//! Local caches of hub data, bootstrapped from a snapshot and kept current
//! from the connection's event stream.
//!
//! Both caches must be re-initialized after every new connection: events
//! missed while disconnected invalidate the previous snapshot.

pub mod area;
pub mod error;
pub mod state;

pub use area::{AreasReloaded, EntityAreaCache};
pub use error::CacheError;
pub use state::EntityStateCache;
