// ==========================================
// 发酵历史数据导入 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表读取导入配置覆写项
// 存储: config_kv 表 (scope_id='global', key-value)
// ==========================================

use crate::config::import_config::{ColumnMapping, ImportConfig, NumericRange, ReimportPolicy};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置值（存在则覆盖）
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置值；值非法时记录告警并回退默认值
    fn get_parsed_or<T: FromStr + Copy>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>> {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(key, value = %raw, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    fn get_range_or(
        &self,
        min_key: &str,
        max_key: &str,
        default: NumericRange,
    ) -> Result<NumericRange, Box<dyn Error>> {
        let min = self.get_parsed_or(min_key, default.min)?;
        let max = self.get_parsed_or(max_key, default.max)?;
        if min > max {
            warn!(min_key, max_key, min, max, "配置区间非法（min > max），使用默认值");
            return Ok(default);
        }
        Ok(NumericRange::new(min, max))
    }
}

impl ImportConfigReader for ConfigManager {
    fn get_column_mapping(&self) -> Result<ColumnMapping, Box<dyn Error>> {
        match self.get_config_value(config_keys::COLUMN_MAPPING)? {
            None => Ok(ColumnMapping::default()),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }

    fn get_row_bounds(&self) -> Result<(usize, usize), Box<dyn Error>> {
        let defaults = ImportConfig::default();
        let min = self.get_parsed_or(config_keys::MIN_ROWS, defaults.min_rows)?;
        let max = self.get_parsed_or(config_keys::MAX_ROWS, defaults.max_rows)?;
        if min > max {
            warn!(min, max, "行数边界非法（min > max），使用默认值");
            return Ok((defaults.min_rows, defaults.max_rows));
        }
        Ok((min, max))
    }

    fn get_density_range(&self) -> Result<NumericRange, Box<dyn Error>> {
        self.get_range_or(
            config_keys::DENSITY_MIN,
            config_keys::DENSITY_MAX,
            ImportConfig::default().density_range,
        )
    }

    fn get_sugar_range(&self) -> Result<NumericRange, Box<dyn Error>> {
        self.get_range_or(
            config_keys::SUGAR_MIN,
            config_keys::SUGAR_MAX,
            ImportConfig::default().sugar_range,
        )
    }

    fn get_temperature_range(&self) -> Result<NumericRange, Box<dyn Error>> {
        self.get_range_or(
            config_keys::TEMPERATURE_MIN,
            config_keys::TEMPERATURE_MAX,
            ImportConfig::default().temperature_range,
        )
    }

    fn get_harvest_mass_anomaly_kg(&self) -> Result<f64, Box<dyn Error>> {
        self.get_parsed_or(
            config_keys::HARVEST_MASS_ANOMALY_KG,
            ImportConfig::default().harvest_mass_anomaly_kg,
        )
    }

    fn get_worker_count(&self) -> Result<usize, Box<dyn Error>> {
        let count = self.get_parsed_or(config_keys::WORKER_COUNT, 1usize)?;
        Ok(count.max(1))
    }

    fn get_reimport_policy(&self) -> Result<ReimportPolicy, Box<dyn Error>> {
        match self.get_config_value(config_keys::REIMPORT_POLICY)? {
            None => Ok(ImportConfig::default().reimport_policy),
            Some(raw) => match ReimportPolicy::parse(&raw) {
                Some(policy) => Ok(policy),
                None => {
                    warn!(value = %raw, "未知的重复导入策略，使用默认值");
                    Ok(ImportConfig::default().reimport_policy)
                }
            },
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 列映射（JSON，可只给出部分字段）
    pub const COLUMN_MAPPING: &str = "import/column_mapping";

    // 结构边界
    pub const MIN_ROWS: &str = "import/min_rows";
    pub const MAX_ROWS: &str = "import/max_rows";

    // 数值合理范围
    pub const DENSITY_MIN: &str = "import/density_min";
    pub const DENSITY_MAX: &str = "import/density_max";
    pub const SUGAR_MIN: &str = "import/sugar_min";
    pub const SUGAR_MAX: &str = "import/sugar_max";
    pub const TEMPERATURE_MIN: &str = "import/temperature_min";
    pub const TEMPERATURE_MAX: &str = "import/temperature_max";
    pub const HARVEST_MASS_ANOMALY_KG: &str = "import/harvest_mass_anomaly_kg";

    // 执行
    pub const WORKER_COUNT: &str = "import/worker_count";
    pub const REIMPORT_POLICY: &str = "import/reimport_policy";
}
