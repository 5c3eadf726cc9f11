// ==========================================
// 发酵历史数据导入 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 把历史发酵记录（CSV/Excel）批量导入为领域实体
//           单元级原子提交，任务级部分成功
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与导入过程模型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 校验/编排/任务
pub mod importer;

// 配置层 - 导入配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{JobState, SampleKind, Severity, UnitStatus, WineType};

// 领域实体
pub use domain::{
    Fermentation, FermentationLotSource, HarvestLot, ImportReport, ImportUnit, ParsedSource,
    Sample, SourceRecord, UnitResult, ValidationIssue, Vineyard, VineyardBlock,
};

// 导入
pub use importer::{
    ImportError, ImportJobManager, ImportOrchestrator, ImportOutcome, ImportResult,
    ImportSource, JobStatus,
};

// 配置
pub use config::{ConfigManager, ImportConfig, ImportConfigReader, ReimportPolicy};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "发酵历史数据导入";
