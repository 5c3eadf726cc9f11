// ==========================================
// 发酵历史数据导入 - 导入任务管理器
// ==========================================
// 职责: 进程内任务注册表（触发/状态/取消/报告/标注输出）
// 执行: 每个任务一个 spawn_blocking 后台任务（rusqlite 为同步 API）
// 状态: PENDING → RUNNING → (COMPLETED | CANCELLED | FAILED)
// 红线: 任务之间不共享缓存与汇总器，只共享编排器（不可变）
// ==========================================

use crate::domain::import::{ImportProgress, ImportReport, ParsedSource};
use crate::domain::types::JobState;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::orchestrator::{ImportOrchestrator, ImportOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 导入来源
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// 磁盘文件（CSV / Excel）
    File(PathBuf),
    /// 已解析的源数据
    Parsed(ParsedSource),
}

/// 任务状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub units_done: usize,
    pub units_total: usize,
}

struct JobEntry {
    state: JobState,
    progress: ImportProgress,
    cancel: CancellationToken,
    outcome: Option<ImportOutcome>,
    handle: Option<JoinHandle<()>>,
}

type JobTable = Arc<RwLock<HashMap<String, JobEntry>>>;

// ==========================================
// ImportJobManager
// ==========================================
pub struct ImportJobManager {
    orchestrator: Arc<ImportOrchestrator>,
    jobs: JobTable,
}

impl ImportJobManager {
    pub fn new(orchestrator: ImportOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 触发一次导入，立即返回任务 ID
    ///
    /// 必须在 tokio 运行时内调用
    pub fn start_import(&self, source: ImportSource, tenant_id: &str) -> ImportResult<String> {
        let runtime = Handle::try_current()
            .map_err(|e| ImportError::InternalError(format!("缺少 tokio 运行时: {}", e)))?;

        let job_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        write_jobs(&self.jobs).insert(
            job_id.clone(),
            JobEntry {
                state: JobState::Pending,
                progress: ImportProgress {
                    units_done: 0,
                    units_total: 0,
                },
                cancel: cancel.clone(),
                outcome: None,
                handle: None,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let jobs = Arc::clone(&self.jobs);
        let task_job_id = job_id.clone();
        let tenant_id = tenant_id.to_string();

        let handle = runtime.spawn_blocking(move || {
            set_state(&jobs, &task_job_id, JobState::Running);

            let progress_jobs = Arc::clone(&jobs);
            let progress_job_id = task_job_id.clone();
            let on_progress = move |progress: ImportProgress| {
                if let Some(entry) = write_jobs(&progress_jobs).get_mut(&progress_job_id) {
                    // worker 池下回调顺序不保证，只保留最大进度
                    if progress.units_done >= entry.progress.units_done {
                        entry.progress = progress;
                    }
                }
            };

            let outcome = match &source {
                ImportSource::File(path) => {
                    orchestrator.run_file(&task_job_id, path, &tenant_id, &cancel, &on_progress)
                }
                ImportSource::Parsed(parsed) => {
                    orchestrator.run(&task_job_id, parsed, &tenant_id, &cancel, &on_progress)
                }
            };

            info!(job_id = %task_job_id, state = %outcome.state, "导入任务已结束");
            if let Some(entry) = write_jobs(&jobs).get_mut(&task_job_id) {
                entry.state = outcome.state;
                entry.outcome = Some(outcome);
            }
        });

        if let Some(entry) = write_jobs(&self.jobs).get_mut(&job_id) {
            entry.handle = Some(handle);
        }

        info!(job_id = %job_id, "导入任务已提交");
        Ok(job_id)
    }

    /// 查询任务状态
    pub fn get_status(&self, job_id: &str) -> Option<JobStatus> {
        read_jobs(&self.jobs).get(job_id).map(|entry| JobStatus {
            state: entry.state,
            units_done: entry.progress.units_done,
            units_total: entry.progress.units_total,
        })
    }

    /// 请求取消；任务不存在或已结束时返回 false
    ///
    /// 正在处理的单元运行到提交或回滚，之后不再领取新单元
    pub fn cancel(&self, job_id: &str) -> bool {
        let jobs = read_jobs(&self.jobs);
        match jobs.get(job_id) {
            Some(entry) if !entry.state.is_terminal() => {
                entry.cancel.cancel();
                info!(job_id, "已请求取消导入任务");
                true
            }
            _ => false,
        }
    }

    /// 已定稿的报告（任务结束前为 None）
    pub fn get_report(&self, job_id: &str) -> Option<ImportReport> {
        read_jobs(&self.jobs)
            .get(job_id)
            .and_then(|entry| entry.outcome.as_ref())
            .map(|outcome| outcome.report.clone())
    }

    /// 标注版源文件（任务结束前为 None；FAILED 时为空）
    pub fn get_annotated_output(&self, job_id: &str) -> Option<Vec<u8>> {
        read_jobs(&self.jobs)
            .get(job_id)
            .and_then(|entry| entry.outcome.as_ref())
            .map(|outcome| outcome.annotated.clone())
    }

    /// 等待任务结束并返回终态
    pub async fn wait(&self, job_id: &str) -> ImportResult<JobStatus> {
        let handle = write_jobs(&self.jobs)
            .get_mut(job_id)
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))?
            .handle
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job_id, error = %e, "导入任务异常退出");
                set_state(&self.jobs, job_id, JobState::Failed);
            }
        }

        self.get_status(job_id)
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }
}

fn set_state(jobs: &JobTable, job_id: &str, state: JobState) {
    if let Some(entry) = write_jobs(jobs).get_mut(job_id) {
        entry.state = state;
    }
}

fn read_jobs(jobs: &JobTable) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
    jobs.read().unwrap_or_else(|poisoned| {
        warn!("任务表读锁已中毒，继续使用内部数据");
        poisoned.into_inner()
    })
}

fn write_jobs(jobs: &JobTable) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
    jobs.write().unwrap_or_else(|poisoned| {
        warn!("任务表写锁已中毒，继续使用内部数据");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::import_config::ImportConfig;
    use crate::db::{open_sqlite_connection, init_schema};
    use crate::domain::import::SourceRecord;
    use tempfile::NamedTempFile;

    fn setup() -> (NamedTempFile, ImportJobManager) {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap().to_string();
        let conn = open_sqlite_connection(&path).unwrap();
        init_schema(&conn).unwrap();
        let orchestrator = ImportOrchestrator::new(path, ImportConfig::default());
        (temp_file, ImportJobManager::new(orchestrator))
    }

    fn source(units: &[&str]) -> ParsedSource {
        let headers: Vec<String> = [
            "fermentation_code",
            "vineyard_name",
            "harvest_date",
            "harvest_mass_kg",
            "grape_variety",
            "measured_at",
            "density",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let records = units
            .iter()
            .enumerate()
            .map(|(idx, key)| {
                let values = [
                    key.to_string(),
                    "North Block".to_string(),
                    "2021-09-14".to_string(),
                    "1200".to_string(),
                    "Merlot".to_string(),
                    "2021-09-15 08:00".to_string(),
                    "1.090".to_string(),
                ];
                SourceRecord::new(
                    idx + 1,
                    headers.iter().cloned().zip(values).collect(),
                )
            })
            .collect();

        ParsedSource::new(headers, records)
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let (_file, manager) = setup();

        let job_id = manager
            .start_import(ImportSource::Parsed(source(&["F-01", "F-02"])), "winery-1")
            .unwrap();
        let status = manager.wait(&job_id).await.unwrap();

        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.units_done, 2);
        assert_eq!(status.units_total, 2);

        let report = manager.get_report(&job_id).unwrap();
        assert_eq!(report.committed_count, 2);
        assert!(!manager.get_annotated_output(&job_id).unwrap().is_empty());

        // 已结束的任务不能再取消
        assert!(!manager.cancel(&job_id));
    }

    #[tokio::test]
    async fn test_schema_failure_is_failed_state() {
        let (_file, manager) = setup();
        let broken = ParsedSource::new(vec!["fermentation_code".to_string()], Vec::new());

        let job_id = manager
            .start_import(ImportSource::Parsed(broken), "winery-1")
            .unwrap();
        let status = manager.wait(&job_id).await.unwrap();

        assert_eq!(status.state, JobState::Failed);
        let report = manager.get_report(&job_id).unwrap();
        assert!(report.fatal.is_some());
        assert_eq!(report.total_units, 0);
        assert_eq!(manager.get_annotated_output(&job_id), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_missing_file_is_failed_state() {
        let (_file, manager) = setup();

        let job_id = manager
            .start_import(
                ImportSource::File(PathBuf::from("/nonexistent/history.csv")),
                "winery-1",
            )
            .unwrap();
        let status = manager.wait(&job_id).await.unwrap();

        assert_eq!(status.state, JobState::Failed);
        assert_eq!(
            manager.get_report(&job_id).unwrap().fatal.unwrap().field,
            "file"
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_file, manager) = setup();

        assert!(manager.get_status("missing").is_none());
        assert!(!manager.cancel("missing"));
        assert!(manager.get_report("missing").is_none());
        assert!(matches!(
            manager.wait("missing").await,
            Err(ImportError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let (_file, manager) = setup();
        let result = manager.start_import(ImportSource::Parsed(source(&["F-01"])), "winery-1");
        assert!(matches!(result, Err(ImportError::InternalError(_))));
    }
}
