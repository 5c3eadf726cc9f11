// ==========================================
// 发酵历史数据导入 - 数据仓储层
// ==========================================
// 职责: 每个聚合一个 Repository，只做数据 CRUD
// 红线: 聚合之间只通过外键 ID 关联，不做对象级关系遍历
// ==========================================

pub mod error;
pub mod fermentation_repo;
pub mod harvest_lot_repo;
pub mod reference_store;
pub mod sample_repo;
pub mod vineyard_repo;

use rusqlite::Connection;

// 重导出
pub use error::{RepositoryError, RepositoryResult};
pub use fermentation_repo::{
    FermentationRepository, LotSourceRepository, SqliteFermentationRepository,
    SqliteLotSourceRepository,
};
pub use harvest_lot_repo::{HarvestLotRepository, SqliteHarvestLotRepository};
pub use reference_store::ReferenceStore;
pub use sample_repo::{SampleRepository, SqliteSampleRepository};
pub use vineyard_repo::{
    SqliteVineyardBlockRepository, SqliteVineyardRepository, VineyardBlockRepository,
    VineyardRepository,
};

// ==========================================
// SqliteRepositories - 绑定同一连接/事务的仓储集合
// ==========================================
pub struct SqliteRepositories<'c> {
    pub vineyards: SqliteVineyardRepository<'c>,
    pub blocks: SqliteVineyardBlockRepository<'c>,
    pub harvest_lots: SqliteHarvestLotRepository<'c>,
    pub fermentations: SqliteFermentationRepository<'c>,
    pub lot_sources: SqliteLotSourceRepository<'c>,
    pub samples: SqliteSampleRepository<'c>,
}

impl<'c> SqliteRepositories<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            vineyards: SqliteVineyardRepository::new(conn),
            blocks: SqliteVineyardBlockRepository::new(conn),
            harvest_lots: SqliteHarvestLotRepository::new(conn),
            fermentations: SqliteFermentationRepository::new(conn),
            lot_sources: SqliteLotSourceRepository::new(conn),
            samples: SqliteSampleRepository::new(conn),
        }
    }
}
