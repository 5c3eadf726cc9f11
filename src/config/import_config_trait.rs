// ==========================================
// 发酵历史数据导入 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::import_config::{ColumnMapping, ImportConfig, NumericRange, ReimportPolicy};
use std::error::Error;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportConfigReader: Send + Sync {
    /// 列名映射（默认: ColumnMapping::default()）
    fn get_column_mapping(&self) -> Result<ColumnMapping, Box<dyn Error>>;

    /// 行数下限 / 上限（默认: 1 / 50000）
    fn get_row_bounds(&self) -> Result<(usize, usize), Box<dyn Error>>;

    /// 密度合理范围（默认: 0.95 – 1.20 g/mL）
    fn get_density_range(&self) -> Result<NumericRange, Box<dyn Error>>;

    /// 糖度合理范围（默认: 0 – 40 °Brix）
    fn get_sugar_range(&self) -> Result<NumericRange, Box<dyn Error>>;

    /// 温度合理范围（默认: -5 – 45 °C）
    fn get_temperature_range(&self) -> Result<NumericRange, Box<dyn Error>>;

    /// 采收重量异常上限（默认: 100000 kg）
    fn get_harvest_mass_anomaly_kg(&self) -> Result<f64, Box<dyn Error>>;

    /// 并发 worker 数（默认: 1，顺序执行）
    fn get_worker_count(&self) -> Result<usize, Box<dyn Error>>;

    /// 重复导入策略（默认: REJECT_EXISTING）
    fn get_reimport_policy(&self) -> Result<ReimportPolicy, Box<dyn Error>>;

    /// 汇总为 ImportConfig
    fn load_import_config(&self) -> Result<ImportConfig, Box<dyn Error>> {
        let (min_rows, max_rows) = self.get_row_bounds()?;
        Ok(ImportConfig {
            columns: self.get_column_mapping()?,
            min_rows,
            max_rows,
            density_range: self.get_density_range()?,
            sugar_range: self.get_sugar_range()?,
            temperature_range: self.get_temperature_range()?,
            harvest_mass_anomaly_kg: self.get_harvest_mass_anomaly_kg()?,
            worker_count: self.get_worker_count()?,
            reimport_policy: self.get_reimport_policy()?,
            ..ImportConfig::default()
        })
    }
}
