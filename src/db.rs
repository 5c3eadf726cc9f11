// ==========================================
// 发酵历史数据导入 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键/ busy_timeout）
// - 幂等建表，自然键由 UNIQUE 约束兜底
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
///
/// 并发 worker 各自持有连接，写事务在 SQLite 层串行，需要足够的等待时间
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 10_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
///
/// 文件库启用 WAL：单元事务写入期间其他连接仍可读
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    Ok(conn)
}

/// 初始化导入所需的表结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS vineyard (
            vineyard_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS vineyard_block (
            block_id TEXT PRIMARY KEY,
            vineyard_id TEXT NOT NULL REFERENCES vineyard(vineyard_id),
            code TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (vineyard_id, code)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_vineyard_block_default
          ON vineyard_block(vineyard_id) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS harvest_lot (
            harvest_lot_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            block_id TEXT NOT NULL REFERENCES vineyard_block(block_id),
            code TEXT NOT NULL,
            harvest_date TEXT NOT NULL,
            mass_kg REAL NOT NULL CHECK (mass_kg > 0),
            grape_variety TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_harvest_lot_code
          ON harvest_lot(tenant_id, code);

        CREATE TABLE IF NOT EXISTS fermentation (
            fermentation_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            code TEXT NOT NULL,
            vineyard_id TEXT NOT NULL REFERENCES vineyard(vineyard_id),
            grape_variety TEXT NOT NULL,
            wine_type TEXT,
            input_mass_kg REAL NOT NULL CHECK (input_mass_kg > 0),
            started_at TEXT NOT NULL,
            is_historical INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fermentation_code
          ON fermentation(tenant_id, code);

        CREATE TABLE IF NOT EXISTS fermentation_lot_source (
            lot_source_id TEXT PRIMARY KEY,
            fermentation_id TEXT NOT NULL REFERENCES fermentation(fermentation_id),
            harvest_lot_id TEXT NOT NULL REFERENCES harvest_lot(harvest_lot_id),
            mass_used_kg REAL NOT NULL CHECK (mass_used_kg > 0),
            created_at TEXT NOT NULL,
            UNIQUE (fermentation_id, harvest_lot_id)
        );

        CREATE TABLE IF NOT EXISTS sample (
            sample_id TEXT PRIMARY KEY,
            fermentation_id TEXT NOT NULL REFERENCES fermentation(fermentation_id),
            kind TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            source_row INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (fermentation_id, kind, recorded_at)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
