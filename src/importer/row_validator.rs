// ==========================================
// 发酵历史数据导入 - 行级校验器实现
// ==========================================
// 职责: 单行字段校验（必填、格式、数值范围、枚举）
// 红线: 纯函数，不访问存储，不依赖其他行
// ==========================================

use crate::config::import_config::{ImportConfig, NumericRange};
use crate::domain::import::{SourceRecord, ValidationIssue};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::importer_trait::{RowCheck, RowValidator};

pub struct RowValidatorImpl {
    mapper: FieldMapper,
    density_range: NumericRange,
    sugar_range: NumericRange,
    temperature_range: NumericRange,
    harvest_mass_anomaly_kg: f64,
}

impl RowValidatorImpl {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            mapper: FieldMapper::new(config.columns.clone()),
            density_range: config.density_range,
            sugar_range: config.sugar_range,
            temperature_range: config.temperature_range,
            harvest_mass_anomaly_kg: config.harvest_mass_anomaly_kg,
        }
    }

    fn check_range(
        issues: &mut Vec<ValidationIssue>,
        record: &SourceRecord,
        unit_key: Option<&str>,
        field: &str,
        value: Option<f64>,
        range: NumericRange,
        unit: &str,
    ) {
        if let Some(v) = value {
            if !range.contains(v) {
                issues.push(ValidationIssue::row_error(
                    record.row_index,
                    unit_key,
                    field,
                    format!(
                        "数值超出合理范围: {} {}（允许 [{}, {}]）",
                        v, unit, range.min, range.max
                    ),
                ));
            }
        }
    }
}

impl RowValidator for RowValidatorImpl {
    fn check(&self, record: &SourceRecord) -> RowCheck {
        let (values, mut issues) = self.mapper.map(record);
        let columns = self.mapper.columns();
        let unit_key = values.unit_key.as_deref();
        let row = record.row_index;

        // 必填字段（已有格式错误的字段不再重复报告缺失）
        for column in columns.required_columns() {
            if record.get(column).is_none() {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    column,
                    "必填字段缺失",
                ));
            }
        }

        // 采收重量
        if let Some(mass) = values.harvest_mass_kg {
            if mass <= 0.0 {
                issues.push(ValidationIssue::row_error(
                    row,
                    unit_key,
                    columns.harvest_mass_kg.as_str(),
                    format!("采收重量必须大于 0: {}", mass),
                ));
            } else if mass > self.harvest_mass_anomaly_kg {
                issues.push(ValidationIssue::row_warning(
                    row,
                    unit_key,
                    columns.harvest_mass_kg.as_str(),
                    format!(
                        "采收重量异常 ({} > {} kg)，可能单位错误",
                        mass, self.harvest_mass_anomaly_kg
                    ),
                ));
            }
        }

        // 读数范围
        Self::check_range(
            &mut issues,
            record,
            unit_key,
            &columns.density,
            values.density,
            self.density_range,
            "g/mL",
        );
        Self::check_range(
            &mut issues,
            record,
            unit_key,
            &columns.sugar_brix,
            values.sugar_brix,
            self.sugar_range,
            "°Brix",
        );
        Self::check_range(
            &mut issues,
            record,
            unit_key,
            &columns.temperature_c,
            values.temperature_c,
            self.temperature_range,
            "°C",
        );

        // 测量时间早于采收日期
        if let (Some(harvest_date), Some(measured_at)) = (values.harvest_date, values.measured_at)
        {
            if measured_at.date() < harvest_date {
                issues.push(ValidationIssue::row_warning(
                    row,
                    unit_key,
                    columns.measured_at.as_str(),
                    format!("测量时间 {} 早于采收日期 {}", measured_at, harvest_date),
                ));
            }
        }

        RowCheck { values, issues }
    }
}
