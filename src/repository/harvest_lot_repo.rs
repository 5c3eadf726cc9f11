// ==========================================
// 发酵历史数据导入 - 采收批次 Repository
// ==========================================
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::vineyard::HarvestLot;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, OptionalExtension};

pub trait HarvestLotRepository {
    /// 按自然键 (tenant_id, code) 查询最早创建的采收批次
    fn find_by_natural_key(&self, tenant_id: &str, code: &str)
        -> RepositoryResult<Option<HarvestLot>>;

    fn create(&self, lot: &HarvestLot) -> RepositoryResult<()>;
}

pub struct SqliteHarvestLotRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteHarvestLotRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl HarvestLotRepository for SqliteHarvestLotRepository<'_> {
    fn find_by_natural_key(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<HarvestLot>> {
        let lot = self
            .conn
            .query_row(
                "SELECT harvest_lot_id, tenant_id, block_id, code, harvest_date,
                        mass_kg, grape_variety, created_at
                 FROM harvest_lot WHERE tenant_id = ?1 AND code = ?2
                 ORDER BY created_at ASC LIMIT 1",
                params![tenant_id, code],
                |row| {
                    Ok(HarvestLot {
                        harvest_lot_id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        block_id: row.get(2)?,
                        code: row.get(3)?,
                        harvest_date: row.get(4)?,
                        mass_kg: row.get(5)?,
                        grape_variety: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(lot)
    }

    fn create(&self, lot: &HarvestLot) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO harvest_lot (
                harvest_lot_id, tenant_id, block_id, code, harvest_date,
                mass_kg, grape_variety, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                lot.harvest_lot_id,
                lot.tenant_id,
                lot.block_id,
                lot.code,
                lot.harvest_date,
                lot.mass_kg,
                lot.grape_variety,
                lot.created_at,
            ],
        )?;
        Ok(())
    }
}
