//! Notification channel lifecycle: the transition function, the registry
//! used for webhook correlation and the per-account monitor driving both.

pub mod monitor;
pub mod registry;
pub mod state;

pub use monitor::{ChannelMonitor, MonitorSettings};
pub use registry::ChannelRegistry;
pub use state::{Channel, ChannelStatus, MonitorState, RenewalPolicy};
