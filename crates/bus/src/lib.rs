mod dispatch;
pub mod error;
pub mod memory;
pub mod traits;
pub mod wal;

use std::path::Path;
use std::sync::Arc;

use relay_core::config::{BusConfig, BusKind};

pub use error::BusError;
pub use memory::MemoryBus;
pub use traits::{EventBus, EventHandler, HandlerFuture};
pub use wal::WalBus;

/// Build the configured bus variant. The WAL variant defaults its
/// directory to `<state_dir>/wal`.
pub fn build_bus(cfg: &BusConfig, state_dir: &Path) -> Result<Arc<dyn EventBus>, BusError> {
    match cfg.kind {
        BusKind::Memory => Ok(Arc::new(MemoryBus::new(cfg))),
        BusKind::Wal => {
            let dir = cfg
                .wal_dir
                .clone()
                .unwrap_or_else(|| state_dir.join("wal"));
            Ok(Arc::new(WalBus::open(&dir, cfg)?))
        }
    }
}
