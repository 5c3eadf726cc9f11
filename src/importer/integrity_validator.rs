// ==========================================
// 发酵历史数据导入 - 单元完整性校验器实现
// ==========================================
// 职责: 同一单元内跨行一致性校验
// 检查:
// - 单元级元数据（葡萄园/采收日期/采收重量/品种/酒型）各行一致
// - 同种类样本时间戳稳定排序后严格递增（重复为 ERROR，乱序为 WARNING）
// - 引用自然键（葡萄园名称）可解析
// 任一 ERROR 拒绝整个单元
// ==========================================

use crate::config::import_config::{ColumnMapping, ImportConfig};
use crate::domain::import::ValidationIssue;
use crate::domain::types::{SampleKind, Severity};
use crate::importer::field_mapper::ValidRow;
use crate::importer::importer_trait::IntegrityValidator;
use std::collections::BTreeMap;
use std::fmt::Display;

pub struct IntegrityValidatorImpl {
    columns: ColumnMapping,
    vineyard_name_max_len: usize,
}

impl IntegrityValidatorImpl {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            columns: config.columns.clone(),
            vineyard_name_max_len: config.vineyard_name_max_len,
        }
    }

    /// 某字段首次出现与首行不同的值时报告一次
    fn check_constant<T, F>(
        issues: &mut Vec<ValidationIssue>,
        unit_key: &str,
        field: &str,
        rows: &[ValidRow],
        get: F,
    ) where
        T: PartialEq + Display,
        F: Fn(&ValidRow) -> Option<T>,
    {
        let mut reference: Option<(usize, T)> = None;
        for row in rows {
            let Some(value) = get(row) else { continue };
            let Some((ref_row, ref_value)) = &reference else {
                reference = Some((row.row_index, value));
                continue;
            };
            if *ref_value != value {
                issues.push(ValidationIssue::unit_issue(
                    unit_key,
                    Severity::Error,
                    field,
                    format!(
                        "单元内 {} 不一致: 行 {} 为 {}，行 {} 为 {}",
                        field, ref_row, ref_value, row.row_index, value
                    ),
                ));
                return;
            }
        }
    }

    fn check_metadata(&self, unit_key: &str, rows: &[ValidRow], issues: &mut Vec<ValidationIssue>) {
        let c = &self.columns;
        Self::check_constant(issues, unit_key, &c.vineyard_name, rows, |r| {
            Some(r.vineyard_name.clone())
        });
        Self::check_constant(issues, unit_key, &c.harvest_date, rows, |r| {
            Some(r.harvest_date)
        });
        Self::check_constant(issues, unit_key, &c.harvest_mass_kg, rows, |r| {
            Some(r.harvest_mass_kg)
        });
        Self::check_constant(issues, unit_key, &c.grape_variety, rows, |r| {
            Some(r.grape_variety.clone())
        });
        // 酒型为可选列，空值不参与比较
        Self::check_constant(issues, unit_key, &c.wine_type, rows, |r| r.wine_type);
    }

    fn check_chronology(
        &self,
        unit_key: &str,
        rows: &[ValidRow],
        issues: &mut Vec<ValidationIssue>,
    ) {
        if rows
            .windows(2)
            .any(|pair| pair[1].measured_at < pair[0].measured_at)
        {
            issues.push(ValidationIssue::unit_issue(
                unit_key,
                Severity::Warning,
                self.columns.measured_at.as_str(),
                "测量记录未按时间顺序排列，落库时按时间排序",
            ));
        }

        let mut by_kind: BTreeMap<SampleKind, Vec<&ValidRow>> = BTreeMap::new();
        for row in rows {
            for (kind, _) in row.readings() {
                by_kind.entry(kind).or_default().push(row);
            }
        }

        for (kind, mut kind_rows) in by_kind {
            // 稳定排序，相同时间戳保持源顺序
            kind_rows.sort_by_key(|r| r.measured_at);
            for pair in kind_rows.windows(2) {
                if pair[1].measured_at <= pair[0].measured_at {
                    issues.push(ValidationIssue::row_error(
                        pair[1].row_index,
                        Some(unit_key),
                        self.columns.measured_at.as_str(),
                        format!(
                            "{} 样本时间戳重复: {}（与行 {} 相同）",
                            kind, pair[1].measured_at, pair[0].row_index
                        ),
                    ));
                }
            }
        }
    }

    fn check_references(
        &self,
        unit_key: &str,
        rows: &[ValidRow],
        issues: &mut Vec<ValidationIssue>,
    ) {
        let Some(first) = rows.first() else { return };
        let name = first.vineyard_name.trim();

        if name.is_empty() {
            issues.push(ValidationIssue::unit_issue(
                unit_key,
                Severity::Error,
                self.columns.vineyard_name.as_str(),
                "葡萄园名称为空，无法解析引用",
            ));
        } else if name.chars().count() > self.vineyard_name_max_len {
            issues.push(ValidationIssue::unit_issue(
                unit_key,
                Severity::Error,
                self.columns.vineyard_name.as_str(),
                format!(
                    "葡萄园名称过长（{} > {} 字符）",
                    name.chars().count(),
                    self.vineyard_name_max_len
                ),
            ));
        }
    }
}

impl IntegrityValidator for IntegrityValidatorImpl {
    fn validate(&self, unit_key: &str, rows: &[ValidRow]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if rows.is_empty() {
            return issues;
        }

        self.check_metadata(unit_key, rows, &mut issues);
        self.check_chronology(unit_key, rows, &mut issues);
        self.check_references(unit_key, rows, &mut issues);
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::WineType;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 9, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn row(row_index: usize, measured_at: NaiveDateTime) -> ValidRow {
        ValidRow {
            row_index,
            unit_key: "F-01".to_string(),
            vineyard_name: "North Block".to_string(),
            harvest_date: NaiveDate::from_ymd_opt(2021, 9, 14).unwrap(),
            harvest_mass_kg: 1200.0,
            grape_variety: "Merlot".to_string(),
            wine_type: Some(WineType::Red),
            measured_at,
            density: 1.09,
            sugar_brix: None,
            temperature_c: None,
        }
    }

    fn validator() -> IntegrityValidatorImpl {
        IntegrityValidatorImpl::new(&ImportConfig::default())
    }

    #[test]
    fn test_consistent_unit_passes() {
        let rows = vec![row(1, at(15, 8)), row(2, at(16, 8)), row(3, at(17, 8))];
        assert!(validator().validate("F-01", &rows).is_empty());
    }

    #[test]
    fn test_inconsistent_metadata_is_error() {
        let mut second = row(2, at(16, 8));
        second.grape_variety = "Syrah".to_string();
        let rows = vec![row(1, at(15, 8)), second];

        let issues = validator().validate("F-01", &rows);

        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
        assert_eq!(issues[0].field, "grape_variety");
        assert_eq!(issues[0].row_index, None);
    }

    #[test]
    fn test_blank_wine_type_does_not_conflict() {
        let mut second = row(2, at(16, 8));
        second.wine_type = None;
        let rows = vec![row(1, at(15, 8)), second];

        assert!(validator().validate("F-01", &rows).is_empty());
    }

    #[test]
    fn test_duplicate_timestamp_is_error() {
        let rows = vec![row(1, at(15, 8)), row(2, at(15, 8))];

        let issues = validator().validate("F-01", &rows);

        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
        assert_eq!(issues[0].row_index, Some(2));
    }

    #[test]
    fn test_duplicate_timestamp_only_counts_within_kind() {
        let mut first = row(1, at(15, 8));
        first.sugar_brix = Some(23.0);
        let mut second = row(2, at(16, 8));
        second.temperature_c = Some(18.0);

        assert!(validator().validate("F-01", &[first, second]).is_empty());
    }

    #[test]
    fn test_out_of_order_is_warning_only() {
        let rows = vec![row(1, at(17, 8)), row(2, at(15, 8)), row(3, at(16, 8))];

        let issues = validator().validate("F-01", &rows);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_overlong_vineyard_name_is_error() {
        let mut only = row(1, at(15, 8));
        only.vineyard_name = "x".repeat(201);

        let issues = validator().validate("F-01", &[only]);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "vineyard_name");
    }
}
