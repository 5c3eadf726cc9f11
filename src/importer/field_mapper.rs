// ==========================================
// 发酵历史数据导入 - 字段映射器实现
// ==========================================
// 职责: 源列 → 逻辑字段映射 + 类型转换
// 说明: 格式错误记为行级 ERROR，对应字段置为 None，不中断映射
// ==========================================

use crate::config::import_config::ColumnMapping;
use crate::domain::import::{SourceRecord, ValidationIssue};
use crate::domain::types::{SampleKind, WineType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// 支持的日期格式
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

/// 支持的时间戳格式（RFC3339 另行处理）
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d%H%M%S",
];

/// 解析十进制数（拒绝 NaN / 无穷）
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// 解析日期
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// 解析时间戳（带时区的 RFC3339 统一换算为 UTC）
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        // Excel 零点时间戳只输出日期部分
        .or_else(|| parse_date(value).map(|d| d.and_time(NaiveTime::MIN)))
}

// ==========================================
// RowValues - 类型化行值（字段可能缺失）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    pub row_index: usize,
    pub unit_key: Option<String>,
    pub vineyard_name: Option<String>,
    pub harvest_date: Option<NaiveDate>,
    pub harvest_mass_kg: Option<f64>,
    pub grape_variety: Option<String>,
    pub wine_type: Option<WineType>,
    pub measured_at: Option<NaiveDateTime>,
    pub density: Option<f64>,
    pub sugar_brix: Option<f64>,
    pub temperature_c: Option<f64>,
}

impl RowValues {
    /// 必填字段齐全时转为 ValidRow
    pub fn into_valid(self) -> Option<ValidRow> {
        Some(ValidRow {
            row_index: self.row_index,
            unit_key: self.unit_key?,
            vineyard_name: self.vineyard_name?,
            harvest_date: self.harvest_date?,
            harvest_mass_kg: self.harvest_mass_kg?,
            grape_variety: self.grape_variety?,
            wine_type: self.wine_type,
            measured_at: self.measured_at?,
            density: self.density?,
            sugar_brix: self.sugar_brix,
            temperature_c: self.temperature_c,
        })
    }
}

// ==========================================
// ValidRow - 通过行级校验的行
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRow {
    pub row_index: usize,
    pub unit_key: String,
    pub vineyard_name: String,
    pub harvest_date: NaiveDate,
    pub harvest_mass_kg: f64,
    pub grape_variety: String,
    pub wine_type: Option<WineType>,
    pub measured_at: NaiveDateTime,
    pub density: f64,
    pub sugar_brix: Option<f64>,
    pub temperature_c: Option<f64>,
}

impl ValidRow {
    /// 本行出现的读数（密度必有，糖度/温度可选）
    pub fn readings(&self) -> Vec<(SampleKind, f64)> {
        let mut readings = vec![(SampleKind::Density, self.density)];
        if let Some(sugar) = self.sugar_brix {
            readings.push((SampleKind::Sugar, sugar));
        }
        if let Some(temperature) = self.temperature_c {
            readings.push((SampleKind::Temperature, temperature));
        }
        readings
    }
}

// ==========================================
// FieldMapper - 字段映射器
// ==========================================
#[derive(Debug, Clone)]
pub struct FieldMapper {
    columns: ColumnMapping,
}

impl FieldMapper {
    pub fn new(columns: ColumnMapping) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &ColumnMapping {
        &self.columns
    }

    /// 读取源记录中的单元键
    pub fn unit_key<'r>(&self, record: &'r SourceRecord) -> Option<&'r str> {
        record.get(&self.columns.unit_key)
    }

    /// 映射一行；返回类型化值与格式错误
    pub fn map(&self, record: &SourceRecord) -> (RowValues, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let unit_key = self.unit_key(record);
        let row = record.row_index;
        let c = &self.columns;

        let mut decimal = |column: &str| -> Option<f64> {
            let raw = record.get(column)?;
            let parsed = parse_decimal(raw);
            if parsed.is_none() {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    column,
                    format!("无法解析为数值: {}", raw),
                ));
            }
            parsed
        };

        let harvest_mass_kg = decimal(&c.harvest_mass_kg);
        let density = decimal(&c.density);
        let sugar_brix = decimal(&c.sugar_brix);
        let temperature_c = decimal(&c.temperature_c);

        let harvest_date = record.get(&c.harvest_date).and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    c.harvest_date.as_str(),
                    format!("日期格式错误: {}", raw),
                ));
            }
            parsed
        });

        let measured_at = record.get(&c.measured_at).and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    c.measured_at.as_str(),
                    format!("时间格式错误: {}", raw),
                ));
            }
            parsed
        });

        let wine_type = record.get(&c.wine_type).and_then(|raw| {
            let parsed = WineType::parse(raw);
            if parsed.is_none() {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    c.wine_type.as_str(),
                    format!(
                        "未知酒型: {}（允许: RED/WHITE/ROSE/SPARKLING/DESSERT/FORTIFIED）",
                        raw
                    ),
                ));
            }
            parsed
        });

        let values = RowValues {
            row_index: row,
            unit_key: unit_key.map(str::to_string),
            vineyard_name: record.get(&c.vineyard_name).map(str::to_string),
            harvest_date,
            harvest_mass_kg,
            grape_variety: record.get(&c.grape_variety).map(str::to_string),
            wine_type,
            measured_at,
            density,
            sugar_brix,
            temperature_c,
        };

        (values, issues)
    }
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(ColumnMapping::default())
    }
}
