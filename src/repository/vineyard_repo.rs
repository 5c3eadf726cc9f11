// ==========================================
// 发酵历史数据导入 - 葡萄园/地块 Repository
// ==========================================
// 职责: vineyard / vineyard_block 表的自然键查询与写入
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::vineyard::{Vineyard, VineyardBlock};
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, OptionalExtension, Row};

// ==========================================
// VineyardRepository Trait
// ==========================================
pub trait VineyardRepository {
    /// 按自然键 (tenant_id, name) 查询
    fn find_by_natural_key(&self, tenant_id: &str, name: &str)
        -> RepositoryResult<Option<Vineyard>>;

    /// 插入葡萄园（自然键冲突返回 UniqueConstraintViolation）
    fn create(&self, vineyard: &Vineyard) -> RepositoryResult<()>;
}

// ==========================================
// VineyardBlockRepository Trait
// ==========================================
pub trait VineyardBlockRepository {
    /// 查询葡萄园的默认地块（自然键: vineyard_id + is_default）
    fn find_default(&self, vineyard_id: &str) -> RepositoryResult<Option<VineyardBlock>>;

    fn create(&self, block: &VineyardBlock) -> RepositoryResult<()>;
}

// ==========================================
// SQLite 实现
// ==========================================
// 借用外部连接（普通连接或事务），由调用方决定事务边界
pub struct SqliteVineyardRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteVineyardRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Vineyard> {
        Ok(Vineyard {
            vineyard_id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl VineyardRepository for SqliteVineyardRepository<'_> {
    fn find_by_natural_key(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> RepositoryResult<Option<Vineyard>> {
        let vineyard = self
            .conn
            .query_row(
                "SELECT vineyard_id, tenant_id, name, created_at
                 FROM vineyard WHERE tenant_id = ?1 AND name = ?2",
                params![tenant_id, name],
                Self::map_row,
            )
            .optional()?;
        Ok(vineyard)
    }

    fn create(&self, vineyard: &Vineyard) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO vineyard (vineyard_id, tenant_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                vineyard.vineyard_id,
                vineyard.tenant_id,
                vineyard.name,
                vineyard.created_at,
            ],
        )?;
        Ok(())
    }
}

pub struct SqliteVineyardBlockRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteVineyardBlockRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl VineyardBlockRepository for SqliteVineyardBlockRepository<'_> {
    fn find_default(&self, vineyard_id: &str) -> RepositoryResult<Option<VineyardBlock>> {
        let block = self
            .conn
            .query_row(
                "SELECT block_id, vineyard_id, code, is_default, created_at
                 FROM vineyard_block WHERE vineyard_id = ?1 AND is_default = 1",
                params![vineyard_id],
                |row| {
                    Ok(VineyardBlock {
                        block_id: row.get(0)?,
                        vineyard_id: row.get(1)?,
                        code: row.get(2)?,
                        is_default: row.get::<_, i32>(3)? != 0,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(block)
    }

    fn create(&self, block: &VineyardBlock) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO vineyard_block (block_id, vineyard_id, code, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                block.block_id,
                block.vineyard_id,
                block.code,
                block.is_default as i32,
                block.created_at,
            ],
        )?;
        Ok(())
    }
}
