// ==========================================
// 发酵历史数据导入 - 配置层
// ==========================================
// 职责: 导入配置默认值 + config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config;
pub mod import_config_trait;

// 重导出
pub use config_manager::{config_keys, ConfigManager};
pub use import_config::{ColumnMapping, ImportConfig, NumericRange, ReimportPolicy};
pub use import_config_trait::ImportConfigReader;
