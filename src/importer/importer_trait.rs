// ==========================================
// 发酵历史数据导入 - 导入管道 Trait
// ==========================================
// 职责: 定义文件解析与三级校验接口（不包含实现）
// 校验顺序: 结构校验 → 行级校验 → 单元完整性校验
// ==========================================

use crate::domain::import::{ParsedSource, SourceRecord, ValidationIssue};
use crate::importer::error::ImportResult;
use crate::importer::field_mapper::{RowValues, ValidRow};
use std::path::Path;

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser, ExcelParser, UniversalFileParser
pub trait FileParser: Send + Sync {
    /// 解析文件为表头 + 有序源记录
    fn parse(&self, file_path: &Path) -> ImportResult<ParsedSource>;
}

// ==========================================
// SchemaValidator Trait
// ==========================================
// 实现者: SchemaValidatorImpl
pub trait SchemaValidator: Send + Sync {
    /// 校验整体结构（必需列、列类型、行数边界）
    ///
    /// # 返回
    /// - Ok(()): 结构合法
    /// - Err(ValidationIssue): 第一个致命问题，任务应在处理任何行之前终止
    fn validate(&self, source: &ParsedSource) -> Result<(), ValidationIssue>;
}

// ==========================================
// RowValidator Trait
// ==========================================
// 实现者: RowValidatorImpl
// 纯函数，不访问存储，不会失败
pub trait RowValidator: Send + Sync {
    /// 校验单行并带出类型化字段
    fn check(&self, record: &SourceRecord) -> RowCheck;

    /// 只返回问题列表
    fn validate(&self, record: &SourceRecord) -> Vec<ValidationIssue> {
        self.check(record).issues
    }
}

/// 行级校验结果
#[derive(Debug, Clone)]
pub struct RowCheck {
    pub values: RowValues,
    pub issues: Vec<ValidationIssue>,
}

impl RowCheck {
    pub fn has_error(&self) -> bool {
        self.issues.iter().any(|i| i.is_error())
    }

    /// 无 ERROR 且必填字段齐全时返回 ValidRow
    pub fn into_valid(self) -> (Option<ValidRow>, Vec<ValidationIssue>) {
        if self.has_error() {
            return (None, self.issues);
        }
        (self.values.into_valid(), self.issues)
    }
}

// ==========================================
// IntegrityValidator Trait
// ==========================================
// 实现者: IntegrityValidatorImpl
pub trait IntegrityValidator: Send + Sync {
    /// 校验同一单元内通过行级校验的记录之间的一致性
    ///
    /// # 参数
    /// - unit_key: 单元键（发酵编号）
    /// - rows: 单元内的合法行（保持源文件顺序）
    fn validate(&self, unit_key: &str, rows: &[ValidRow]) -> Vec<ValidationIssue>;
}
