pub mod config;
pub mod dao;
pub mod dispenser;
pub mod error;
pub mod inventory;
pub mod keyfile;
pub mod logger;

pub use dao::key_record::{KeyPool, KeyRecord};
pub use dispenser::{Dispenser, Issue, PaymentOutcome, UserRef};
pub use error::{ConfigError, InventoryError};
pub use inventory::{BulkInsertReport, InventoryStats, KeyInventory, PoolStats};
