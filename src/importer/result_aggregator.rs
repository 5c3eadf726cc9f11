// ==========================================
// 发酵历史数据导入 - 结果汇总器
// ==========================================
// 职责: 汇总单元结果 → 导入报告 + 标注版源文件
// 红线: 纯后处理，不访问存储
// 顺序: 报告中的单元结果按源文件中单元出现顺序排列，与完成顺序无关
// ==========================================

use crate::domain::import::{ImportReport, ParsedSource, UnitResult, ValidationIssue};
use crate::domain::types::{Severity, UnitStatus};
use crate::importer::error::{ImportError, ImportResult};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use std::collections::{HashMap, HashSet};

/// 标注列名
pub const STATUS_COLUMN: &str = "import_status";
pub const ISSUES_COLUMN: &str = "import_issues";

// ==========================================
// ResultAggregator
// ==========================================
pub struct ResultAggregator {
    job_id: String,
    started_at: DateTime<Utc>,
    unit_results: Vec<UnitResult>,
    unassigned_issues: Vec<ValidationIssue>,
    skipped_unit_keys: Vec<(usize, String)>,
}

impl ResultAggregator {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            started_at: Utc::now(),
            unit_results: Vec::new(),
            unassigned_issues: Vec::new(),
            skipped_unit_keys: Vec::new(),
        }
    }

    /// 记录一个单元结果（任意完成顺序）
    pub fn record(&mut self, result: UnitResult) {
        self.unit_results.push(result);
    }

    /// 记录无法归入单元的行级问题
    pub fn record_unassigned(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.unassigned_issues.extend(issues);
    }

    /// 记录因取消而未尝试的单元
    pub fn record_skipped(&mut self, ordinal: usize, unit_key: impl Into<String>) {
        self.skipped_unit_keys.push((ordinal, unit_key.into()));
    }

    pub fn recorded(&self) -> usize {
        self.unit_results.len()
    }

    /// 定稿报告
    pub fn finalize(mut self, fatal: Option<ValidationIssue>, cancelled: bool) -> ImportReport {
        self.unit_results.sort_by_key(|r| r.ordinal);
        self.skipped_unit_keys.sort_by_key(|(ordinal, _)| *ordinal);

        let committed_count = self
            .unit_results
            .iter()
            .filter(|r| r.status == UnitStatus::Committed)
            .count();
        let rejected_count = self.unit_results.len() - committed_count;
        let warning_count = self
            .unit_results
            .iter()
            .flat_map(|r| r.issues.iter())
            .chain(self.unassigned_issues.iter())
            .filter(|i| i.severity == Severity::Warning)
            .count();

        ImportReport {
            job_id: self.job_id,
            total_units: self.unit_results.len(),
            committed_count,
            rejected_count,
            warning_count,
            unit_results: self.unit_results,
            unassigned_issues: self.unassigned_issues,
            skipped_unit_keys: self
                .skipped_unit_keys
                .into_iter()
                .map(|(_, key)| key)
                .collect(),
            fatal,
            started_at: self.started_at,
            finished_at: Utc::now(),
            cancelled,
        }
    }
}

// ==========================================
// 标注版输出
// ==========================================
// 原始列 + import_status (OK|WARNING|ERROR|SKIPPED) + import_issues
// 被拒绝单元中自身无问题的行标为 ERROR 并注明单元被拒绝

fn format_issue(issue: &ValidationIssue) -> String {
    format!("[{}] {}: {}", issue.severity, issue.field, issue.message)
}

/// 生成标注版 CSV
///
/// # 参数
/// - source: 解析后的源文件
/// - report: 定稿后的报告
/// - unit_key_column: 单元键列名（识别被跳过的行）
pub fn annotate(
    source: &ParsedSource,
    report: &ImportReport,
    unit_key_column: &str,
) -> ImportResult<Vec<u8>> {
    // 行号 → 所属单元结果
    let mut unit_of_row: HashMap<usize, &UnitResult> = HashMap::new();
    for result in &report.unit_results {
        for row in &result.row_indices {
            unit_of_row.insert(*row, result);
        }
    }

    // 行号 → 行级问题
    let mut row_issues: HashMap<usize, Vec<&ValidationIssue>> = HashMap::new();
    for issue in report
        .unit_results
        .iter()
        .flat_map(|r| r.issues.iter())
        .chain(report.unassigned_issues.iter())
    {
        if let Some(row) = issue.row_index {
            row_issues.entry(row).or_default().push(issue);
        }
    }

    let skipped: HashSet<&str> = report.skipped_unit_keys.iter().map(String::as_str).collect();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let mut header: Vec<&str> = source.headers.iter().map(String::as_str).collect();
    header.push(STATUS_COLUMN);
    header.push(ISSUES_COLUMN);
    writer.write_record(&header)?;

    for record in &source.records {
        let mut issues: Vec<&ValidationIssue> = row_issues
            .get(&record.row_index)
            .cloned()
            .unwrap_or_default();

        let unit = unit_of_row.get(&record.row_index);
        if let Some(unit) = unit {
            // 单元级问题标注到单元内每一行
            issues.extend(unit.issues.iter().filter(|i| i.row_index.is_none()));
        }

        let has_error = issues.iter().any(|i| i.is_error());
        let has_warning = issues.iter().any(|i| i.severity == Severity::Warning);
        let unit_rejected = unit.is_some_and(|u| u.status == UnitStatus::Rejected);
        let is_skipped = unit.is_none()
            && record
                .get(unit_key_column)
                .is_some_and(|key| skipped.contains(key));

        let mut texts: Vec<String> = issues.iter().map(|i| format_issue(i)).collect();
        let status = if has_error {
            "ERROR"
        } else if unit_rejected {
            texts.push("[ERROR] unit: 所在单元被拒绝，本行未导入".to_string());
            "ERROR"
        } else if is_skipped {
            texts.push("任务已取消，本行未处理".to_string());
            "SKIPPED"
        } else if has_warning {
            "WARNING"
        } else {
            "OK"
        };

        let mut row: Vec<String> = source
            .headers
            .iter()
            .map(|h| record.values.get(h).cloned().unwrap_or_default())
            .collect();
        row.push(status.to_string());
        row.push(texts.join("; "));
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ImportError::CsvParseError(e.to_string()))?;
    Ok(bytes)
}
