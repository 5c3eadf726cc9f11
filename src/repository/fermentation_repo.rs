// ==========================================
// 发酵历史数据导入 - 发酵/原料来源 Repository
// ==========================================
// 职责: fermentation / fermentation_lot_source 表的自然键查询与写入
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::fermentation::{Fermentation, FermentationLotSource};
use crate::domain::types::WineType;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, OptionalExtension};

pub trait FermentationRepository {
    /// 按自然键 (tenant_id, code) 查询
    fn find_by_natural_key(&self, tenant_id: &str, code: &str)
        -> RepositoryResult<Option<Fermentation>>;

    fn create(&self, fermentation: &Fermentation) -> RepositoryResult<()>;
}

pub trait LotSourceRepository {
    /// 按自然键 (fermentation_id, harvest_lot_id) 查询
    fn find_by_natural_key(
        &self,
        fermentation_id: &str,
        harvest_lot_id: &str,
    ) -> RepositoryResult<Option<FermentationLotSource>>;

    fn create(&self, source: &FermentationLotSource) -> RepositoryResult<()>;
}

pub struct SqliteFermentationRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteFermentationRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl FermentationRepository for SqliteFermentationRepository<'_> {
    fn find_by_natural_key(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<Fermentation>> {
        let fermentation = self
            .conn
            .query_row(
                "SELECT fermentation_id, tenant_id, code, vineyard_id, grape_variety,
                        wine_type, input_mass_kg, started_at, is_historical, created_at
                 FROM fermentation WHERE tenant_id = ?1 AND code = ?2
                 ORDER BY created_at ASC LIMIT 1",
                params![tenant_id, code],
                |row| {
                    let wine_type: Option<String> = row.get(5)?;
                    Ok(Fermentation {
                        fermentation_id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        code: row.get(2)?,
                        vineyard_id: row.get(3)?,
                        grape_variety: row.get(4)?,
                        wine_type: wine_type.as_deref().and_then(WineType::parse),
                        input_mass_kg: row.get(6)?,
                        started_at: row.get(7)?,
                        is_historical: row.get::<_, i32>(8)? != 0,
                        created_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(fermentation)
    }

    fn create(&self, fermentation: &Fermentation) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO fermentation (
                fermentation_id, tenant_id, code, vineyard_id, grape_variety,
                wine_type, input_mass_kg, started_at, is_historical, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fermentation.fermentation_id,
                fermentation.tenant_id,
                fermentation.code,
                fermentation.vineyard_id,
                fermentation.grape_variety,
                fermentation.wine_type.map(|t| t.as_str().to_string()),
                fermentation.input_mass_kg,
                fermentation.started_at,
                fermentation.is_historical as i32,
                fermentation.created_at,
            ],
        )?;
        Ok(())
    }
}

pub struct SqliteLotSourceRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteLotSourceRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl LotSourceRepository for SqliteLotSourceRepository<'_> {
    fn find_by_natural_key(
        &self,
        fermentation_id: &str,
        harvest_lot_id: &str,
    ) -> RepositoryResult<Option<FermentationLotSource>> {
        let source = self
            .conn
            .query_row(
                "SELECT lot_source_id, fermentation_id, harvest_lot_id, mass_used_kg, created_at
                 FROM fermentation_lot_source
                 WHERE fermentation_id = ?1 AND harvest_lot_id = ?2",
                params![fermentation_id, harvest_lot_id],
                |row| {
                    Ok(FermentationLotSource {
                        lot_source_id: row.get(0)?,
                        fermentation_id: row.get(1)?,
                        harvest_lot_id: row.get(2)?,
                        mass_used_kg: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(source)
    }

    fn create(&self, source: &FermentationLotSource) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO fermentation_lot_source (
                lot_source_id, fermentation_id, harvest_lot_id, mass_used_kg, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source.lot_source_id,
                source.fermentation_id,
                source.harvest_lot_id,
                source.mass_used_kg,
                source.created_at,
            ],
        )?;
        Ok(())
    }
}
