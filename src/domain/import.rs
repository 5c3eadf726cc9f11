// ==========================================
// 发酵历史数据导入 - 导入过程模型
// ==========================================
// 职责: 源记录/校验问题/单元结果/导入报告
// 生命周期: 仅在一次导入任务内（报告可由调用方持久化）
// ==========================================

use crate::domain::types::{Severity, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==========================================
// SourceRecord - 源记录
// ==========================================
// 解析后不可变；row_index 为数据行号（从 1 开始，不含表头）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub row_index: usize,
    pub values: HashMap<String, String>,
}

impl SourceRecord {
    pub fn new(row_index: usize, values: HashMap<String, String>) -> Self {
        Self { row_index, values }
    }

    /// 读取列值（去除首尾空白，空值返回 None）
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

// ==========================================
// ParsedSource - 解析后的源文件
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub headers: Vec<String>,         // 表头（保持原始列序）
    pub records: Vec<SourceRecord>,   // 数据行（保持原始行序）
}

impl ParsedSource {
    pub fn new(headers: Vec<String>, records: Vec<SourceRecord>) -> Self {
        Self { headers, records }
    }
}

// ==========================================
// ValidationIssue - 校验问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub row_index: Option<usize>,   // 行级问题的行号；单元级/结构级为 None
    pub unit_key: Option<String>,   // 所属导入单元
    pub field: String,              // 相关字段
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    /// 行级 ERROR
    pub fn row_error(
        row_index: usize,
        unit_key: Option<&str>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index: Some(row_index),
            unit_key: unit_key.map(str::to_string),
            field: field.into(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// 行级 WARNING
    pub fn row_warning(
        row_index: usize,
        unit_key: Option<&str>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::row_error(row_index, unit_key, field, message)
        }
    }

    /// 单元级问题（跨行不一致、事务失败等）
    pub fn unit_issue(
        unit_key: &str,
        severity: Severity,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index: None,
            unit_key: Some(unit_key.to_string()),
            field: field.into(),
            severity,
            message: message.into(),
        }
    }

    /// 结构级致命问题
    pub fn fatal(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row_index: None,
            unit_key: None,
            field: field.into(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// ==========================================
// ImportUnit - 已落库的单元层级
// ==========================================
// 完整落库或完全不存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportUnit {
    pub unit_key: String,
    pub vineyard_id: String,
    pub block_id: String,
    pub harvest_lot_id: String,
    pub fermentation_id: String,
    pub lot_source_id: String,
    pub sample_ids: Vec<String>,
}

impl ImportUnit {
    /// 本单元事务内创建的实体 ID（不含共享的葡萄园/地块）
    pub fn created_entity_ids(&self) -> Vec<String> {
        let mut ids = vec![
            self.harvest_lot_id.clone(),
            self.fermentation_id.clone(),
            self.lot_source_id.clone(),
        ];
        ids.extend(self.sample_ids.iter().cloned());
        ids
    }
}

// ==========================================
// UnitResult - 单元结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub ordinal: usize,                  // 单元在源文件中的出现顺序
    pub unit_key: String,
    pub status: UnitStatus,
    pub issues: Vec<ValidationIssue>,
    pub created_entity_ids: Vec<String>, // COMMITTED 时非空
    pub row_indices: Vec<usize>,         // 单元包含的源行号
}

impl UnitResult {
    pub fn committed(
        ordinal: usize,
        unit: &ImportUnit,
        issues: Vec<ValidationIssue>,
        row_indices: Vec<usize>,
    ) -> Self {
        Self {
            ordinal,
            unit_key: unit.unit_key.clone(),
            status: UnitStatus::Committed,
            issues,
            created_entity_ids: unit.created_entity_ids(),
            row_indices,
        }
    }

    pub fn rejected(
        ordinal: usize,
        unit_key: &str,
        issues: Vec<ValidationIssue>,
        row_indices: Vec<usize>,
    ) -> Self {
        Self {
            ordinal,
            unit_key: unit_key.to_string(),
            status: UnitStatus::Rejected,
            issues,
            created_entity_ids: Vec::new(),
            row_indices,
        }
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }
}

// ==========================================
// ImportReport - 导入报告
// ==========================================
// 任务结束（完成/取消/失败）时定稿，之后不可变
// 取消时: unit_results.len() == total_units < 分组得到的单元数，
// 未尝试的单元不进入 unit_results，只出现在 skipped_unit_keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub job_id: String,
    /// 已尝试（已提交或已拒绝）的单元数，恒等于 unit_results.len()；
    /// 分组单元数 = total_units + skipped_unit_keys.len()
    pub total_units: usize,
    pub committed_count: usize,
    pub rejected_count: usize,
    pub warning_count: usize,
    pub unit_results: Vec<UnitResult>,
    pub unassigned_issues: Vec<ValidationIssue>, // 缺少发酵编号、无法分组的行
    pub skipped_unit_keys: Vec<String>,          // 取消后未尝试的单元（源文件顺序）
    pub fatal: Option<ValidationIssue>,          // 结构校验失败原因
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl ImportReport {
    /// 按单元键查找结果
    pub fn unit(&self, unit_key: &str) -> Option<&UnitResult> {
        self.unit_results.iter().find(|u| u.unit_key == unit_key)
    }

    /// 所有问题（单元 + 未分组行 + 致命）
    pub fn all_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.unit_results
            .iter()
            .flat_map(|u| u.issues.iter())
            .chain(self.unassigned_issues.iter())
            .chain(self.fatal.iter())
    }
}

// ==========================================
// ImportProgress - 进度
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub units_done: usize,
    pub units_total: usize,
}
