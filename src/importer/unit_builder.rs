// ==========================================
// 发酵历史数据导入 - 导入单元构建器
// ==========================================
// 职责: 在一个事务作用域内创建单元的完整实体层级
// 流程:
// 1. 经缓存解析葡萄园（不存在则在单元事务内创建）
// 2. 经缓存解析默认地块（每个葡萄园一个，跨单元复用）
// 3. 创建采收批次
// 4. 创建发酵（按重复导入策略检查自然键）
// 5. 创建原料来源（mass_used_kg = 采收重量，单一来源）
// 6. 按时间顺序创建样本（每行每个读数一条）
// 任一步失败 → 作用域回滚整个单元（含本单元新建的葡萄园/地块）
// 提交成功后才把新建的引用实体发布到缓存
// ==========================================

use crate::config::import_config::ReimportPolicy;
use crate::domain::fermentation::{Fermentation, FermentationLotSource, Sample};
use crate::domain::import::ImportUnit;
use crate::domain::vineyard::HarvestLot;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::ValidRow;
use crate::importer::reference_cache::ReferenceCache;
use crate::importer::transaction_scope::TransactionScope;
use crate::repository::{
    FermentationRepository, HarvestLotRepository, LotSourceRepository, SampleRepository,
    SqliteRepositories,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

pub struct UnitBuilder {
    reimport_policy: ReimportPolicy,
}

impl UnitBuilder {
    pub fn new(reimport_policy: ReimportPolicy) -> Self {
        Self { reimport_policy }
    }

    /// 构建并提交一个导入单元
    ///
    /// # 参数
    /// - unit_key: 发酵编号
    /// - rows: 通过行级与完整性校验的行（源文件顺序）
    /// - cache: 本任务的引用实体缓存
    /// - scope: 本单元的事务作用域
    pub fn build(
        &self,
        unit_key: &str,
        rows: &[ValidRow],
        cache: &ReferenceCache,
        scope: TransactionScope<'_>,
    ) -> ImportResult<ImportUnit> {
        let first = rows.first().ok_or_else(|| ImportError::UnitRejected {
            unit_key: unit_key.to_string(),
            message: "单元没有可落库的行".to_string(),
        })?;

        let mut ordered: Vec<&ValidRow> = rows.iter().collect();
        ordered.sort_by_key(|r| r.measured_at);

        let tenant_id = cache.tenant_id();
        let mut references = cache.reserve();

        let outcome = scope.run(|repos| -> ImportResult<ImportUnit> {
            self.check_reimport(repos, tenant_id, unit_key)?;

            let vineyard = references.resolve_or_create_vineyard(repos, &first.vineyard_name)?;
            let block = references.resolve_or_create_default_block(repos, &vineyard.vineyard_id)?;

            let now = Utc::now();
            let wine_type = rows.iter().find_map(|r| r.wine_type);
            let started_at = ordered
                .first()
                .map(|r| r.measured_at)
                .unwrap_or(first.measured_at);

            let lot = HarvestLot {
                harvest_lot_id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                block_id: block.block_id.clone(),
                code: unit_key.to_string(),
                harvest_date: first.harvest_date,
                mass_kg: first.harvest_mass_kg,
                grape_variety: first.grape_variety.clone(),
                created_at: now,
            };
            repos.harvest_lots.create(&lot)?;

            let fermentation = Fermentation {
                fermentation_id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                code: unit_key.to_string(),
                vineyard_id: vineyard.vineyard_id.clone(),
                grape_variety: first.grape_variety.clone(),
                wine_type,
                input_mass_kg: first.harvest_mass_kg,
                started_at,
                is_historical: true,
                created_at: now,
            };
            repos.fermentations.create(&fermentation)?;

            let lot_source = FermentationLotSource {
                lot_source_id: Uuid::new_v4().to_string(),
                fermentation_id: fermentation.fermentation_id.clone(),
                harvest_lot_id: lot.harvest_lot_id.clone(),
                mass_used_kg: lot.mass_kg,
                created_at: now,
            };
            repos.lot_sources.create(&lot_source)?;

            let mut sample_ids = Vec::new();
            for row in &ordered {
                for (kind, value) in row.readings() {
                    let sample = Sample {
                        sample_id: Uuid::new_v4().to_string(),
                        fermentation_id: fermentation.fermentation_id.clone(),
                        kind,
                        value,
                        unit: kind.unit().to_string(),
                        recorded_at: row.measured_at,
                        source_row: row.row_index,
                        created_at: now,
                    };
                    repos.samples.create(&sample)?;
                    sample_ids.push(sample.sample_id);
                }
            }

            debug!(
                unit_key,
                fermentation_id = %fermentation.fermentation_id,
                samples = sample_ids.len(),
                "单元实体已写入"
            );

            Ok(ImportUnit {
                unit_key: unit_key.to_string(),
                vineyard_id: vineyard.vineyard_id,
                block_id: block.block_id,
                harvest_lot_id: lot.harvest_lot_id,
                fermentation_id: fermentation.fermentation_id,
                lot_source_id: lot_source.lot_source_id,
                sample_ids,
            })
        });

        // 未提交的预留在此丢弃，槽位释放
        if outcome.is_ok() {
            references.commit();
        }
        outcome
    }

    fn check_reimport(
        &self,
        repos: &SqliteRepositories<'_>,
        tenant_id: &str,
        unit_key: &str,
    ) -> ImportResult<()> {
        if self.reimport_policy == ReimportPolicy::AllowDuplicates {
            return Ok(());
        }

        if let Some(existing) = repos
            .fermentations
            .find_by_natural_key(tenant_id, unit_key)?
        {
            return Err(ImportError::UnitRejected {
                unit_key: unit_key.to_string(),
                message: format!(
                    "发酵 {} 已导入（fermentation_id={}），按重复导入策略拒绝",
                    unit_key, existing.fermentation_id
                ),
            });
        }
        Ok(())
    }
}
