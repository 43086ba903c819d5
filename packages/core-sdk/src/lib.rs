pub mod adapter;
pub mod campaign;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod settings;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::adapter::{ActiveConfigSource, ContentAdapter};
    pub use crate::config::AppConfig;
    pub use crate::error::{AdapterError, StoreError};
    pub use crate::models::{GenerationRequest, Platform, ProviderConfig, ProviderName};
    pub use crate::settings::{ConfigOrigin, SettingsSource};
    pub use crate::{db, llm, models, server, telemetry};
}
