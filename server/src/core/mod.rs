//! Core application infrastructure

pub(crate) mod banner;
pub mod cli;
pub mod config;
pub mod constants;
pub mod metadata;
pub mod shutdown;

pub use crate::app::CoreApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, CacheBackendType, DataSourceConfig};
pub use metadata::{
    BaseInfo, DataSourceMetadata, MetadataError, MetadataProvider, StaticMetadataProvider,
};
pub use shutdown::ShutdownService;
