//! Outbound client notices and the pub/sub mechanics that carry them.
//!
//! Notices relay terminal job outcomes, low-credit warnings and block
//! decisions to whatever UI channel is attached (SSE, a desktop shell, tests).
//! They are informational: the job record and the ledger stay the source of
//! truth, so delivery is best-effort.

pub mod bus;
pub mod in_memory_bus;
pub mod notice;

pub use bus::{BusError, EventBus, Subscription};
pub use in_memory_bus::InMemoryEventBus;
pub use notice::ClientNotice;
