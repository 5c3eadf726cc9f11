// ==========================================
// 发酵历史数据导入 - 导入配置
// ==========================================
// 职责: 列映射、行数边界、数值合理范围、并发度、重复导入策略
// 默认值可被 config_kv 表覆写（见 ConfigManager）
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// ColumnMapping - 列名映射
// ==========================================
// 源文件列名由调用方配置，导入逻辑只使用逻辑字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub unit_key: String,        // 发酵编号（导入单元键）
    pub vineyard_name: String,   // 葡萄园名称
    pub harvest_date: String,    // 采收日期
    pub harvest_mass_kg: String, // 采收重量（kg）
    pub grape_variety: String,   // 品种
    pub wine_type: String,       // 酒型（可选列）
    pub measured_at: String,     // 测量时间
    pub density: String,         // 密度（必填读数）
    pub sugar_brix: String,      // 糖度（可选读数）
    pub temperature_c: String,   // 温度（可选读数）
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            unit_key: "fermentation_code".to_string(),
            vineyard_name: "vineyard_name".to_string(),
            harvest_date: "harvest_date".to_string(),
            harvest_mass_kg: "harvest_mass_kg".to_string(),
            grape_variety: "grape_variety".to_string(),
            wine_type: "wine_type".to_string(),
            measured_at: "measured_at".to_string(),
            density: "density".to_string(),
            sugar_brix: "sugar_brix".to_string(),
            temperature_c: "temperature_c".to_string(),
        }
    }
}

impl ColumnMapping {
    /// 必须出现在表头中的列
    pub fn required_columns(&self) -> Vec<&str> {
        vec![
            self.unit_key.as_str(),
            self.vineyard_name.as_str(),
            self.harvest_date.as_str(),
            self.harvest_mass_kg.as_str(),
            self.grape_variety.as_str(),
            self.measured_at.as_str(),
            self.density.as_str(),
        ]
    }

    /// 数值列（结构校验检查可解析性）
    pub fn numeric_columns(&self) -> Vec<&str> {
        vec![
            self.harvest_mass_kg.as_str(),
            self.density.as_str(),
            self.sugar_brix.as_str(),
            self.temperature_c.as_str(),
        ]
    }

    /// 日期/时间列
    pub fn temporal_columns(&self) -> Vec<&str> {
        vec![self.harvest_date.as_str(), self.measured_at.as_str()]
    }
}

// ==========================================
// NumericRange - 合理取值范围（闭区间）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

// ==========================================
// ReimportPolicy - 重复导入策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReimportPolicy {
    /// 同租户下已存在同编号发酵时拒绝该单元
    RejectExisting,
    /// 总是新建（重复执行会产生重复发酵/样本）
    AllowDuplicates,
}

impl ReimportPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "REJECT_EXISTING" => Some(ReimportPolicy::RejectExisting),
            "ALLOW_DUPLICATES" => Some(ReimportPolicy::AllowDuplicates),
            _ => None,
        }
    }
}

// ==========================================
// ImportConfig - 导入配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub columns: ColumnMapping,

    // ===== 结构边界 =====
    pub min_rows: usize,
    pub max_rows: usize,

    // ===== 数值合理范围 =====
    pub density_range: NumericRange,       // g/mL
    pub sugar_range: NumericRange,         // °Brix
    pub temperature_range: NumericRange,   // °C
    pub harvest_mass_anomaly_kg: f64,      // 超过则 WARNING（可能单位错误）
    pub vineyard_name_max_len: usize,

    // ===== 执行 =====
    pub worker_count: usize,               // 1 = 顺序执行
    pub reimport_policy: ReimportPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            min_rows: 1,
            max_rows: 50_000,
            density_range: NumericRange::new(0.95, 1.20),
            sugar_range: NumericRange::new(0.0, 40.0),
            temperature_range: NumericRange::new(-5.0, 45.0),
            harvest_mass_anomaly_kg: 100_000.0,
            vineyard_name_max_len: 200,
            worker_count: 1,
            reimport_policy: ReimportPolicy::RejectExisting,
        }
    }
}
