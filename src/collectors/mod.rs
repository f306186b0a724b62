pub mod device;
pub mod fleet;

pub use fleet::{FleetCollector, ScrapeStats};
