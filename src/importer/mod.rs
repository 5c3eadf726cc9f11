// ==========================================
// 发酵历史数据导入 - 导入层
// ==========================================
// 职责: 源文件 → 结构校验 → 分组 → 行级/完整性校验 →
//       单元事务落库 → 报告与标注输出
// 支持: CSV, Excel
// ==========================================

// 模块声明
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod importer_trait;
pub mod integrity_validator;
pub mod job_manager;
pub mod orchestrator;
pub mod reference_cache;
pub mod result_aggregator;
pub mod row_validator;
pub mod schema_validator;
pub mod transaction_scope;
pub mod unit_builder;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use field_mapper::{FieldMapper, RowValues, ValidRow};
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use integrity_validator::IntegrityValidatorImpl;
pub use job_manager::{ImportJobManager, ImportSource, JobStatus};
pub use orchestrator::{ImportOrchestrator, ImportOutcome, ProgressCallback};
pub use reference_cache::{ReferenceCache, ReferenceCacheStats, ReferenceReservation};
pub use result_aggregator::{annotate, ResultAggregator, ISSUES_COLUMN, STATUS_COLUMN};
pub use row_validator::RowValidatorImpl;
pub use schema_validator::SchemaValidatorImpl;
pub use transaction_scope::TransactionScope;
pub use unit_builder::UnitBuilder;

// 重导出 Trait 接口
pub use importer_trait::{FileParser, IntegrityValidator, RowCheck, RowValidator, SchemaValidator};
