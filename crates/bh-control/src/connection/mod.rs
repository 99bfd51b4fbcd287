//! Connection management
//!
//! Tunnels, the pending-dial table each tunnel owns, and the registry that
//! maps worker ids to their current tunnel.

mod grace;
mod health;
mod pending;
mod registry;
mod stream;
mod tunnel;

pub use grace::GRACE_SWEEP_INTERVAL;
pub use health::HealthMonitor;
pub use pending::{DialHandle, DialResult, PendingDials};
pub use registry::{Registry, RegistryStats};
pub use stream::ReverseStream;
pub use tunnel::Tunnel;
