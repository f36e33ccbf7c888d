//! Fabric layer: device enumeration, session management and discovery.

pub mod connector;
pub mod enumerator;
pub mod lock;
pub mod session;

pub use connector::Connector;
pub use enumerator::DeviceEnumerator;
pub use lock::HostLock;
pub use session::{FabricSessionManager, device_id_from_path};
