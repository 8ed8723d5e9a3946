//! Service layer for lspbind

pub mod config;
pub mod project;
pub mod scheduler;

pub use config::{ConfigService, DefaultConfigService};
pub use project::{ContentTypes, ProjectLocator};
pub use scheduler::{BackgroundTask, SessionSource, TaskScheduler};
