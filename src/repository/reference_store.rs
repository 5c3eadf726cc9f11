// ==========================================
// 发酵历史数据导入 - 引用实体存储
// ==========================================
// 职责: 葡萄园/默认地块的查询与幂等创建
// 说明: 在调用方的单元事务内执行，随单元一起提交或回滚
// ==========================================

use crate::domain::vineyard::{Vineyard, VineyardBlock, DEFAULT_BLOCK_CODE};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::vineyard_repo::{VineyardBlockRepository, VineyardRepository};
use crate::repository::SqliteRepositories;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

// ==========================================
// ReferenceStore Trait
// ==========================================
// 用途: ReferenceCache 的后端
// 实现者: SqliteRepositories（单元事务内的仓储集合）
pub trait ReferenceStore {
    fn find_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Option<Vineyard>>;

    /// 创建葡萄园；若同名葡萄园已存在，返回已存在的记录
    fn create_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Vineyard>;

    fn find_default_block(&self, vineyard_id: &str) -> RepositoryResult<Option<VineyardBlock>>;

    /// 创建默认地块；若已存在则返回已存在的记录
    fn create_default_block(&self, vineyard_id: &str) -> RepositoryResult<VineyardBlock>;
}

impl ReferenceStore for SqliteRepositories<'_> {
    fn find_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Option<Vineyard>> {
        self.vineyards.find_by_natural_key(tenant_id, name)
    }

    fn create_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Vineyard> {
        let candidate = Vineyard {
            vineyard_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match self.vineyards.create(&candidate) {
            Ok(()) => Ok(candidate),
            // 其他进程已创建同名葡萄园
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                debug!(tenant_id, name, "葡萄园已存在，复用已有记录");
                self.vineyards
                    .find_by_natural_key(tenant_id, name)?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "vineyard".to_string(),
                        id: name.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    fn find_default_block(&self, vineyard_id: &str) -> RepositoryResult<Option<VineyardBlock>> {
        self.blocks.find_default(vineyard_id)
    }

    fn create_default_block(&self, vineyard_id: &str) -> RepositoryResult<VineyardBlock> {
        let candidate = VineyardBlock {
            block_id: Uuid::new_v4().to_string(),
            vineyard_id: vineyard_id.to_string(),
            code: DEFAULT_BLOCK_CODE.to_string(),
            is_default: true,
            created_at: Utc::now(),
        };

        match self.blocks.create(&candidate) {
            Ok(()) => Ok(candidate),
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                debug!(vineyard_id, "默认地块已存在，复用已有记录");
                self.blocks
                    .find_default(vineyard_id)?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "vineyard_block".to_string(),
                        id: vineyard_id.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_create_vineyard_is_idempotent() {
        let conn = conn();
        let repos = SqliteRepositories::new(&conn);

        let first = repos.create_vineyard("winery-1", "North Block").unwrap();
        let second = repos.create_vineyard("winery-1", "North Block").unwrap();

        assert_eq!(first.vineyard_id, second.vineyard_id);
        assert_eq!(
            repos
                .find_vineyard("winery-1", "North Block")
                .unwrap()
                .unwrap()
                .vineyard_id,
            first.vineyard_id
        );
    }

    #[test]
    fn test_create_default_block_is_idempotent() {
        let conn = conn();
        let repos = SqliteRepositories::new(&conn);
        let vineyard = repos.create_vineyard("winery-1", "North Block").unwrap();

        let first = repos.create_default_block(&vineyard.vineyard_id).unwrap();
        let second = repos.create_default_block(&vineyard.vineyard_id).unwrap();

        assert_eq!(first.block_id, second.block_id);
        assert_eq!(first.code, DEFAULT_BLOCK_CODE);
    }

    #[test]
    fn test_references_roll_back_with_transaction() {
        let mut conn = conn();
        {
            let tx = conn.transaction().unwrap();
            let repos = SqliteRepositories::new(&tx);
            let vineyard = repos.create_vineyard("winery-1", "Lonely Hill").unwrap();
            repos.create_default_block(&vineyard.vineyard_id).unwrap();
            // tx 未提交即丢弃 → 回滚
        }

        let repos = SqliteRepositories::new(&conn);
        assert!(repos
            .find_vineyard("winery-1", "Lonely Hill")
            .unwrap()
            .is_none());
    }
}
