// ==========================================
// 发酵历史数据导入 - 领域模型层
// ==========================================
// 职责: 定义领域实体、导入过程模型、类型
// 红线: 不含数据访问逻辑，不含导入流程逻辑
// ==========================================

pub mod fermentation;
pub mod import;
pub mod types;
pub mod vineyard;

// 重导出核心类型
pub use fermentation::{Fermentation, FermentationLotSource, Sample};
pub use import::{
    ImportProgress, ImportReport, ImportUnit, ParsedSource, SourceRecord, UnitResult,
    ValidationIssue,
};
pub use types::{JobState, SampleKind, Severity, UnitStatus, WineType};
pub use vineyard::{HarvestLot, Vineyard, VineyardBlock, DEFAULT_BLOCK_CODE};
