// ==========================================
// 发酵历史数据导入 - 导入编排器
// ==========================================
// 职责: 驱动一次导入任务的完整流程
// 流程: 结构校验（失败即终止）→ 按发酵编号分组 →
//       逐单元 [行级校验 → 完整性校验 → 事务内构建] →
//       汇总结果 → 进度回调 → 单元之间检查取消
// 状态: PENDING → RUNNING → (COMPLETED | CANCELLED | FAILED)
// 并发: worker_count > 1 时使用有界 worker 池，每个 worker 独立连接
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::import::{
    ImportProgress, ImportReport, ParsedSource, SourceRecord, UnitResult, ValidationIssue,
};
use crate::domain::types::{JobState, Severity};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{FieldMapper, ValidRow};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::importer_trait::{
    FileParser, IntegrityValidator, RowValidator, SchemaValidator,
};
use crate::importer::integrity_validator::IntegrityValidatorImpl;
use crate::importer::reference_cache::{ReferenceCache, ReferenceCacheStats};
use crate::importer::result_aggregator::{annotate, ResultAggregator};
use crate::importer::row_validator::RowValidatorImpl;
use crate::importer::schema_validator::SchemaValidatorImpl;
use crate::importer::transaction_scope::TransactionScope;
use crate::importer::unit_builder::UnitBuilder;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 进度回调（worker 池下可能从多个线程调用，顺序不保证）
pub type ProgressCallback<'a> = &'a (dyn Fn(ImportProgress) + Send + Sync);

// ==========================================
// ImportOutcome - 任务终态
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub state: JobState,
    pub report: ImportReport,
    pub annotated: Vec<u8>, // FAILED 时为空
    pub cache_stats: ReferenceCacheStats,
}

// ==========================================
// UnitGroup - 按单元键分组的源记录
// ==========================================
struct UnitGroup<'s> {
    ordinal: usize,
    unit_key: String,
    records: Vec<&'s SourceRecord>,
}

impl UnitGroup<'_> {
    fn row_indices(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.row_index).collect()
    }
}

// ==========================================
// ImportOrchestrator
// ==========================================
pub struct ImportOrchestrator {
    db_path: String,
    config: ImportConfig,

    // 校验组件
    schema_validator: Box<dyn SchemaValidator>,
    row_validator: Box<dyn RowValidator>,
    integrity_validator: Box<dyn IntegrityValidator>,
    file_parser: Box<dyn FileParser>,

    unit_builder: UnitBuilder,
    mapper: FieldMapper,
}

impl ImportOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（每个 worker 各自打开连接）
    /// - config: 导入配置
    pub fn new(db_path: impl Into<String>, config: ImportConfig) -> Self {
        Self {
            db_path: db_path.into(),
            schema_validator: Box::new(SchemaValidatorImpl::new(&config)),
            row_validator: Box::new(RowValidatorImpl::new(&config)),
            integrity_validator: Box::new(IntegrityValidatorImpl::new(&config)),
            file_parser: Box::new(UniversalFileParser::with_row_limit(config.max_rows)),
            unit_builder: UnitBuilder::new(config.reimport_policy),
            mapper: FieldMapper::new(config.columns.clone()),
            config,
        }
    }

    /// 从配置读取器加载配置后创建
    pub fn from_config_reader(
        db_path: impl Into<String>,
        reader: &dyn ImportConfigReader,
    ) -> ImportResult<Self> {
        let config = reader
            .load_import_config()
            .map_err(|e| ImportError::ConfigError(e.to_string()))?;
        Ok(Self::new(db_path, config))
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 解析文件并执行导入；文件不可读时任务 FAILED
    pub fn run_file(
        &self,
        job_id: &str,
        file_path: &Path,
        tenant_id: &str,
        cancel: &CancellationToken,
        progress: ProgressCallback<'_>,
    ) -> ImportOutcome {
        match self.file_parser.parse(file_path) {
            Ok(source) => self.run(job_id, &source, tenant_id, cancel, progress),
            Err(e) => {
                error!(job_id, file = %file_path.display(), error = %e, "源文件读取失败");
                Self::failed(job_id, ValidationIssue::fatal("file", e.to_string()))
            }
        }
    }

    /// 执行一次导入任务
    ///
    /// # 参数
    /// - job_id: 任务 ID
    /// - source: 解析后的源文件
    /// - tenant_id: 租户（由调用方解析）
    /// - cancel: 取消令牌，单元之间检查
    /// - progress: 进度回调 (units_done, units_total)
    #[instrument(skip(self, source, cancel, progress), fields(rows = source.records.len()))]
    pub fn run(
        &self,
        job_id: &str,
        source: &ParsedSource,
        tenant_id: &str,
        cancel: &CancellationToken,
        progress: ProgressCallback<'_>,
    ) -> ImportOutcome {
        info!("开始导入历史发酵数据");

        // === 阶段 1: 结构校验 ===
        if let Err(fatal) = self.schema_validator.validate(source) {
            warn!(field = %fatal.field, message = %fatal.message, "结构校验失败，任务终止");
            return Self::failed(job_id, fatal);
        }

        // === 阶段 2: 分组 ===
        let mut aggregator = ResultAggregator::new(job_id);
        let groups = self.group_records(source, &mut aggregator);
        let units_total = groups.len();
        info!(units_total, "分组完成");

        // === 阶段 3: 打开连接 ===
        let cache = ReferenceCache::new(tenant_id);

        let worker_count = self.config.worker_count.clamp(1, units_total.max(1));
        let mut connections = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            match open_sqlite_connection(&self.db_path) {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    error!(error = %e, "数据库连接失败");
                    return Self::failed(
                        job_id,
                        ValidationIssue::fatal("persistence", e.to_string()),
                    );
                }
            }
        }

        // === 阶段 4: 逐单元处理 ===
        progress(ImportProgress {
            units_done: 0,
            units_total,
        });
        let aggregator = Mutex::new(aggregator);
        let claimed =
            self.process_units(&groups, connections, &cache, &aggregator, cancel, progress);

        // === 阶段 5: 汇总 ===
        let mut aggregator = aggregator
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for group in groups.iter().skip(claimed) {
            aggregator.record_skipped(group.ordinal, group.unit_key.clone());
        }
        let cancelled = claimed < units_total;
        let report = aggregator.finalize(None, cancelled);

        let state = if cancelled {
            JobState::Cancelled
        } else {
            JobState::Completed
        };

        let annotated = match annotate(source, &report, &self.config.columns.unit_key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "标注输出生成失败");
                Vec::new()
            }
        };

        let cache_stats = cache.stats();
        info!(
            state = %state,
            total = report.total_units,
            committed = report.committed_count,
            rejected = report.rejected_count,
            warnings = report.warning_count,
            skipped = report.skipped_unit_keys.len(),
            cache_lookups = cache_stats.lookups,
            cache_creates = cache_stats.creates,
            cache_hits = cache_stats.hits,
            "导入任务结束"
        );

        ImportOutcome {
            state,
            report,
            annotated,
            cache_stats,
        }
    }

    /// 按单元键分组（保持首次出现顺序）；无单元键的行记为未分组问题
    fn group_records<'s>(
        &self,
        source: &'s ParsedSource,
        aggregator: &mut ResultAggregator,
    ) -> Vec<UnitGroup<'s>> {
        let mut groups: Vec<UnitGroup<'s>> = Vec::new();
        let mut index: HashMap<&'s str, usize> = HashMap::new();

        for record in &source.records {
            let Some(key) = self.mapper.unit_key(record) else {
                aggregator.record_unassigned(self.row_validator.validate(record));
                continue;
            };

            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(UnitGroup {
                    ordinal: groups.len(),
                    unit_key: key.to_string(),
                    records: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].records.push(record);
        }

        groups
    }

    /// 处理所有单元，返回已领取（已尝试）的单元数
    ///
    /// 单元按顺序领取；取消后不再领取新单元，已领取的单元运行到提交或回滚
    fn process_units(
        &self,
        groups: &[UnitGroup<'_>],
        connections: Vec<Connection>,
        cache: &ReferenceCache,
        aggregator: &Mutex<ResultAggregator>,
        cancel: &CancellationToken,
        progress: ProgressCallback<'_>,
    ) -> usize {
        let next = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let units_total = groups.len();

        let worker = |mut conn: Connection| loop {
            if cancel.is_cancelled() {
                debug!("检测到取消请求，停止领取新单元");
                break;
            }
            let idx = next.fetch_add(1, Ordering::SeqCst);
            let Some(group) = groups.get(idx) else {
                break;
            };

            let result = self.process_unit(group, cache, &mut conn);
            lock_or_recover(aggregator).record(result);

            let units_done = done.fetch_add(1, Ordering::SeqCst) + 1;
            progress(ImportProgress {
                units_done,
                units_total,
            });
        };

        if connections.len() <= 1 {
            for conn in connections {
                worker(conn);
            }
        } else {
            debug!(workers = connections.len(), "启用 worker 池");
            thread::scope(|s| {
                for conn in connections {
                    s.spawn(|| worker(conn));
                }
            });
        }

        next.load(Ordering::SeqCst).min(units_total)
    }

    /// 处理单个单元：行级校验 → 完整性校验 → 事务内构建
    fn process_unit(
        &self,
        group: &UnitGroup<'_>,
        cache: &ReferenceCache,
        conn: &mut Connection,
    ) -> UnitResult {
        let unit_key = group.unit_key.as_str();
        let row_indices = group.row_indices();

        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut valid_rows: Vec<ValidRow> = Vec::new();
        let mut row_rejected = false;

        for record in &group.records {
            let (valid, row_issues) = self.row_validator.check(record).into_valid();
            issues.extend(row_issues);
            match valid {
                Some(row) => valid_rows.push(row),
                None => row_rejected = true,
            }
        }

        if !valid_rows.is_empty() {
            issues.extend(self.integrity_validator.validate(unit_key, &valid_rows));
        }

        if row_rejected || issues.iter().any(|i| i.is_error()) {
            debug!(
                unit_key,
                errors = issues.iter().filter(|i| i.is_error()).count(),
                "单元校验未通过"
            );
            return UnitResult::rejected(group.ordinal, unit_key, issues, row_indices);
        }

        match self
            .unit_builder
            .build(unit_key, &valid_rows, cache, TransactionScope::new(conn))
        {
            Ok(unit) => {
                debug!(unit_key, entities = unit.created_entity_ids().len(), "单元已提交");
                UnitResult::committed(group.ordinal, &unit, issues, row_indices)
            }
            Err(ImportError::UnitRejected { message, .. }) => {
                info!(unit_key, reason = %message, "单元被拒绝");
                issues.push(ValidationIssue::unit_issue(
                    unit_key,
                    Severity::Error,
                    self.config.columns.unit_key.as_str(),
                    message,
                ));
                UnitResult::rejected(group.ordinal, unit_key, issues, row_indices)
            }
            Err(e) => {
                warn!(unit_key, error = %e, "单元持久化失败，已回滚");
                issues.push(ValidationIssue::unit_issue(
                    unit_key,
                    Severity::Error,
                    "persistence",
                    format!("持久化失败，单元已回滚: {}", e),
                ));
                UnitResult::rejected(group.ordinal, unit_key, issues, row_indices)
            }
        }
    }

    fn failed(job_id: &str, fatal: ValidationIssue) -> ImportOutcome {
        let report = ResultAggregator::new(job_id).finalize(Some(fatal), false);
        ImportOutcome {
            state: JobState::Failed,
            report,
            annotated: Vec::new(),
            cache_stats: ReferenceCacheStats::default(),
        }
    }
}

/// 汇总器锁中毒时沿用内部数据（记录不会处于半写状态）
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("汇总器锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        }
    }
}
