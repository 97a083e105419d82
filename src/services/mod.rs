//! Services module for the Redfire IVR engine

pub mod ivr;
pub mod menu_loader;

pub use ivr::{CallHandle, CallInfo, IvrService, IvrStatistics};
pub use menu_loader::build_catalog;
