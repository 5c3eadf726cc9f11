// ==========================================
// 发酵历史数据导入 - 结构校验器实现
// ==========================================
// 职责: 在任何行处理之前校验源文件整体结构
// 检查: 必需列 → 行数边界 → 列类型
// 失败: 返回单个致命问题，任务进入 FAILED
// ==========================================

use crate::config::import_config::{ColumnMapping, ImportConfig};
use crate::domain::import::{ParsedSource, ValidationIssue};
use crate::importer::field_mapper::{parse_date, parse_decimal, parse_timestamp};
use crate::importer::importer_trait::SchemaValidator;
use tracing::debug;

pub struct SchemaValidatorImpl {
    columns: ColumnMapping,
    min_rows: usize,
    max_rows: usize,
}

impl SchemaValidatorImpl {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            columns: config.columns.clone(),
            min_rows: config.min_rows,
            max_rows: config.max_rows,
        }
    }

    fn check_required_columns(&self, source: &ParsedSource) -> Result<(), ValidationIssue> {
        let missing: Vec<&str> = self
            .columns
            .required_columns()
            .into_iter()
            .filter(|col| !source.headers.iter().any(|h| h == col))
            .collect();

        if !missing.is_empty() {
            return Err(ValidationIssue::fatal(
                missing.join(","),
                format!("缺少必需列: {}", missing.join(", ")),
            ));
        }
        Ok(())
    }

    fn check_row_bounds(&self, source: &ParsedSource) -> Result<(), ValidationIssue> {
        let count = source.records.len();
        if count == 0 {
            return Err(ValidationIssue::fatal("rows", "源文件无数据行"));
        }
        if count < self.min_rows {
            return Err(ValidationIssue::fatal(
                "rows",
                format!("数据行数 {} 少于下限 {}", count, self.min_rows),
            ));
        }
        if count > self.max_rows {
            return Err(ValidationIssue::fatal(
                "rows",
                format!("数据行数 {} 超过上限 {}", count, self.max_rows),
            ));
        }
        Ok(())
    }

    /// 某列所有非空单元格都无法解析时视为列类型不匹配
    fn check_column_type(
        &self,
        source: &ParsedSource,
        column: &str,
        expected: &str,
        parses: fn(&str) -> bool,
    ) -> Result<(), ValidationIssue> {
        if !source.headers.iter().any(|h| h == column) {
            return Ok(());
        }

        let mut non_empty = source
            .records
            .iter()
            .filter_map(|r| r.get(column))
            .peekable();

        if non_empty.peek().is_none() {
            return Ok(());
        }

        if non_empty.any(parses) {
            return Ok(());
        }

        Err(ValidationIssue::fatal(
            column,
            format!("列类型不匹配: 列 {} 没有任何可解析的{}值", column, expected),
        ))
    }
}

impl SchemaValidator for SchemaValidatorImpl {
    fn validate(&self, source: &ParsedSource) -> Result<(), ValidationIssue> {
        self.check_required_columns(source)?;
        self.check_row_bounds(source)?;

        for column in self.columns.numeric_columns() {
            self.check_column_type(source, column, "数值", |v| parse_decimal(v).is_some())?;
        }
        self.check_column_type(source, &self.columns.harvest_date, "日期", |v| {
            parse_date(v).is_some()
        })?;
        self.check_column_type(source, &self.columns.measured_at, "时间", |v| {
            parse_timestamp(v).is_some()
        })?;

        debug!(
            rows = source.records.len(),
            columns = source.headers.len(),
            "结构校验通过"
        );
        Ok(())
    }
}
