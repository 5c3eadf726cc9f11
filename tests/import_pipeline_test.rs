// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标: 部分成功、单元原子性、引用实体复用、取消边界、
//           时间顺序、结构校验失败、重复导入策略、worker 池
// ==========================================


use rusqlite::Connection;
use test_helpers::{
    annotated_rows, count_rows, create_test_db, parsed_source, unit_rows, write_csv, HistoryRow,
};
use tokio_util::sync::CancellationToken;
use wine_history_import::config::{ImportConfig, ReimportPolicy};
use wine_history_import::domain::{ImportProgress, JobState, Severity, UnitStatus};
use wine_history_import::importer::ImportOrchestrator;
use wine_history_import::logging;
use wine_history_import::repository::{SampleRepository, SqliteRepositories, FermentationRepository};

fn no_progress(_: ImportProgress) {}

fn orchestrator(db_path: &str) -> ImportOrchestrator {
    ImportOrchestrator::new(db_path, ImportConfig::default())
}

fn three_units_second_bad() -> Vec<HistoryRow> {
    let mut rows = unit_rows("F-01", "North Block", 2);
    let mut bad = unit_rows("F-02", "North Block", 2);
    bad[1] = bad[1].clone().mass("-5");
    rows.extend(bad);
    rows.extend(unit_rows("F-03", "North Block", 2));
    rows
}

#[test]
fn test_partial_success_rejects_only_invalid_unit() {
    logging::init_test();
    let (_db, db_path) = create_test_db().unwrap();
    let source = parsed_source(&three_units_second_bad());

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &source,
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Completed);
    let report = &outcome.report;
    assert_eq!(report.total_units, 3);
    assert_eq!(report.committed_count, 2);
    assert_eq!(report.rejected_count, 1);
    assert_eq!(report.committed_count + report.rejected_count, report.total_units);

    let keys: Vec<&str> = report.unit_results.iter().map(|u| u.unit_key.as_str()).collect();
    assert_eq!(keys, vec!["F-01", "F-02", "F-03"]);

    let rejected = report.unit("F-02").unwrap();
    assert_eq!(rejected.status, UnitStatus::Rejected);
    assert!(rejected.created_entity_ids.is_empty());

    let errors: Vec<_> = report.all_issues().filter(|i| i.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_index, Some(4));
    assert_eq!(errors[0].field, "harvest_mass_kg");
    assert_eq!(errors[0].unit_key.as_deref(), Some("F-02"));

    assert_eq!(count_rows(&db_path, "fermentation"), 2);
    assert_eq!(count_rows(&db_path, "harvest_lot"), 2);
    assert_eq!(count_rows(&db_path, "fermentation_lot_source"), 2);
    // 每行 3 个读数
    assert_eq!(count_rows(&db_path, "sample"), 12);

    let rows = annotated_rows(&outcome.annotated);
    let statuses: Vec<&str> = rows.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(statuses, vec!["OK", "OK", "ERROR", "ERROR", "OK", "OK"]);
    assert!(rows[2].1.contains("所在单元被拒绝"));
    assert!(rows[3].1.starts_with("[ERROR] harvest_mass_kg:"));
}

#[test]
fn test_shared_vineyard_resolved_once_per_job() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = unit_rows("F-01", "North Block", 2);
    rows.extend(unit_rows("F-02", "North Block", 2));
    rows.extend(unit_rows("F-03", "North Block", 1));

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.report.committed_count, 3);
    assert_eq!(count_rows(&db_path, "vineyard"), 1);
    assert_eq!(count_rows(&db_path, "vineyard_block"), 1);
    assert_eq!(outcome.cache_stats.lookups, 2);
    assert_eq!(outcome.cache_stats.creates, 2);
    assert_eq!(outcome.cache_stats.hits, 4);

    // 第二个任务复用已存在的葡萄园与默认地块
    let outcome = orchestrator(&db_path).run(
        "job-2",
        &parsed_source(&unit_rows("F-04", "North Block", 1)),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );
    assert_eq!(outcome.report.committed_count, 1);
    assert_eq!(outcome.cache_stats.creates, 0);
    assert_eq!(count_rows(&db_path, "vineyard"), 1);
    assert_eq!(count_rows(&db_path, "vineyard_block"), 1);
}

#[test]
fn test_storage_failure_rolls_back_whole_unit() {
    let (_db, db_path) = create_test_db().unwrap();
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_sample BEFORE INSERT ON sample
             WHEN NEW.value = 1.111
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .unwrap();
    }

    let mut rows = unit_rows("F-01", "North Block", 2);
    let mut failing = unit_rows("F-02", "North Block", 2);
    failing[1] = failing[1].clone().density("1.111");
    rows.extend(failing);
    rows.extend(unit_rows("F-03", "North Block", 2));

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.report.committed_count, 2);
    let failed = outcome.report.unit("F-02").unwrap();
    assert_eq!(failed.status, UnitStatus::Rejected);
    assert!(failed
        .issues
        .iter()
        .any(|i| i.field == "persistence" && i.is_error()));

    // F-02 的采收批次/发酵/来源/样本全部回滚
    assert_eq!(count_rows(&db_path, "harvest_lot"), 2);
    assert_eq!(count_rows(&db_path, "fermentation"), 2);
    assert_eq!(count_rows(&db_path, "fermentation_lot_source"), 2);
    assert_eq!(count_rows(&db_path, "sample"), 12);

    let conn = Connection::open(&db_path).unwrap();
    let repos = SqliteRepositories::new(&conn);
    assert!(repos
        .fermentations
        .find_by_natural_key("winery-1", "F-02")
        .unwrap()
        .is_none());
}

#[test]
fn test_failed_unit_leaves_no_vineyard_of_its_own() {
    let (_db, db_path) = create_test_db().unwrap();
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_sample BEFORE INSERT ON sample
             WHEN NEW.value = 1.111
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .unwrap();
    }

    // F-02 是 Lonely Hill 的唯一单元
    let mut rows = unit_rows("F-01", "North Block", 2);
    let mut failing = unit_rows("F-02", "Lonely Hill", 2);
    failing[1] = failing[1].clone().density("1.111");
    rows.extend(failing);

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.report.committed_count, 1);
    assert_eq!(outcome.report.unit("F-02").unwrap().status, UnitStatus::Rejected);

    let conn = Connection::open(&db_path).unwrap();
    let lonely: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM vineyard WHERE name = 'Lonely Hill'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(lonely, 0);
    assert_eq!(count_rows(&db_path, "vineyard"), 1);
    assert_eq!(count_rows(&db_path, "vineyard_block"), 1);
}

#[test]
fn test_schema_failure_fails_job_without_writes() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut source = parsed_source(&unit_rows("F-01", "North Block", 2));
    source.headers.retain(|h| h != "density");

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &source,
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Failed);
    let fatal = outcome.report.fatal.as_ref().unwrap();
    assert_eq!(fatal.field, "density");
    assert_eq!(outcome.report.total_units, 0);
    assert!(outcome.report.unit_results.is_empty());
    assert!(outcome.annotated.is_empty());
    assert_eq!(count_rows(&db_path, "vineyard"), 0);
    assert_eq!(count_rows(&db_path, "fermentation"), 0);
}

#[test]
fn test_cancel_stops_claiming_new_units() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = Vec::new();
    for code in ["F-01", "F-02", "F-03", "F-04"] {
        rows.extend(unit_rows(code, "North Block", 2));
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let on_progress = move |progress: ImportProgress| {
        if progress.units_done == 2 {
            trigger.cancel();
        }
    };

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &cancel,
        &on_progress,
    );

    assert_eq!(outcome.state, JobState::Cancelled);
    let report = &outcome.report;
    assert!(report.cancelled);
    assert_eq!(report.total_units, 2);
    assert_eq!(report.committed_count, 2);
    assert_eq!(report.skipped_unit_keys, vec!["F-03", "F-04"]);
    // 跳过的单元不进入 unit_results
    assert_eq!(report.unit_results.len(), report.total_units);
    assert!(report.unit("F-03").is_none());
    assert_eq!(count_rows(&db_path, "fermentation"), 2);

    let statuses: Vec<String> = annotated_rows(&outcome.annotated)
        .into_iter()
        .map(|(s, _)| s)
        .collect();
    assert_eq!(
        statuses,
        vec!["OK", "OK", "OK", "OK", "SKIPPED", "SKIPPED", "SKIPPED", "SKIPPED"]
    );
}

#[test]
fn test_out_of_order_rows_stored_chronologically() {
    let (_db, db_path) = create_test_db().unwrap();
    let rows = vec![
        HistoryRow::new("F-01", "North Block", "2021-09-17 08:00"),
        HistoryRow::new("F-01", "North Block", "2021-09-15 08:00"),
        HistoryRow::new("F-01", "North Block", "2021-09-16 08:00"),
    ];

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.report.committed_count, 1);
    assert_eq!(outcome.report.warning_count, 1);
    let warning = outcome
        .report
        .all_issues()
        .find(|i| i.severity == Severity::Warning)
        .unwrap();
    assert_eq!(warning.field, "measured_at");
    assert!(warning.row_index.is_none());

    let conn = Connection::open(&db_path).unwrap();
    let repos = SqliteRepositories::new(&conn);
    let fermentation = repos
        .fermentations
        .find_by_natural_key("winery-1", "F-01")
        .unwrap()
        .unwrap();
    let source_rows: Vec<usize> = repos
        .samples
        .list_by_fermentation(&fermentation.fermentation_id)
        .unwrap()
        .iter()
        .map(|s| s.source_row)
        .collect();
    assert_eq!(source_rows, vec![2, 2, 2, 3, 3, 3, 1, 1, 1]);

    // 所有行都算 WARNING（单元级问题标注到每一行）
    let statuses: Vec<String> = annotated_rows(&outcome.annotated)
        .into_iter()
        .map(|(s, _)| s)
        .collect();
    assert_eq!(statuses, vec!["WARNING", "WARNING", "WARNING"]);
}

#[test]
fn test_duplicate_timestamp_rejects_unit() {
    let (_db, db_path) = create_test_db().unwrap();
    let rows = vec![
        HistoryRow::new("F-01", "North Block", "2021-09-15 08:00"),
        HistoryRow::new("F-01", "North Block", "2021-09-15 08:00"),
    ];

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.report.rejected_count, 1);
    let unit = outcome.report.unit("F-01").unwrap();
    assert!(unit
        .issues
        .iter()
        .all(|i| i.row_index == Some(2) && i.field == "measured_at"));
    assert_eq!(count_rows(&db_path, "fermentation"), 0);
}

#[test]
fn test_inconsistent_unit_metadata_rejects_unit() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = unit_rows("F-01", "North Block", 2);
    rows[1] = rows[1].clone().variety("Syrah");
    rows.extend(unit_rows("F-02", "North Block", 1));

    let outcome = orchestrator(&db_path).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.report.committed_count, 1);
    let unit = outcome.report.unit("F-01").unwrap();
    assert_eq!(unit.status, UnitStatus::Rejected);
    assert_eq!(unit.error_count(), 1);
    assert_eq!(unit.issues[0].field, "grape_variety");
}

#[test]
fn test_reimport_rejected_by_default_and_allowed_when_configured() {
    let (_db, db_path) = create_test_db().unwrap();
    let source = parsed_source(&unit_rows("F-01", "North Block", 2));
    let cancel = CancellationToken::new();

    let first = orchestrator(&db_path).run("job-1", &source, "winery-1", &cancel, &no_progress);
    assert_eq!(first.report.committed_count, 1);

    let second = orchestrator(&db_path).run("job-2", &source, "winery-1", &cancel, &no_progress);
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.report.rejected_count, 1);
    let issue = &second.report.unit("F-01").unwrap().issues[0];
    assert_eq!(issue.field, "fermentation_code");
    assert_eq!(count_rows(&db_path, "fermentation"), 1);

    // 其他租户不受影响
    let other = orchestrator(&db_path).run("job-3", &source, "winery-2", &cancel, &no_progress);
    assert_eq!(other.report.committed_count, 1);

    let config = ImportConfig {
        reimport_policy: ReimportPolicy::AllowDuplicates,
        ..ImportConfig::default()
    };
    let third = ImportOrchestrator::new(db_path.as_str(), config).run(
        "job-4",
        &source,
        "winery-1",
        &cancel,
        &no_progress,
    );
    assert_eq!(third.report.committed_count, 1);
    assert_eq!(count_rows(&db_path, "fermentation"), 3);
}

#[test]
fn test_worker_pool_gives_same_report_as_sequential() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = Vec::new();
    for i in 1..=12 {
        let vineyard = if i % 2 == 0 { "North Block" } else { "South Slope" };
        let mut unit = unit_rows(&format!("F-{:02}", i), vineyard, 3);
        if i == 7 {
            unit[2] = unit[2].clone().density("9.9");
        }
        rows.extend(unit);
    }

    let config = ImportConfig {
        worker_count: 4,
        ..ImportConfig::default()
    };
    let outcome = ImportOrchestrator::new(db_path.as_str(), config).run(
        "job-1",
        &parsed_source(&rows),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.report.total_units, 12);
    assert_eq!(outcome.report.committed_count, 11);
    assert_eq!(outcome.report.unit("F-07").unwrap().status, UnitStatus::Rejected);

    let keys: Vec<String> = outcome
        .report
        .unit_results
        .iter()
        .map(|u| u.unit_key.clone())
        .collect();
    let expected: Vec<String> = (1..=12).map(|i| format!("F-{:02}", i)).collect();
    assert_eq!(keys, expected);

    assert_eq!(count_rows(&db_path, "vineyard"), 2);
    assert_eq!(count_rows(&db_path, "vineyard_block"), 2);
    assert_eq!(outcome.cache_stats.creates, 4);
    assert_eq!(count_rows(&db_path, "fermentation"), 11);
}

#[test]
fn test_run_file_with_unassigned_rows() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = unit_rows("F-01", "North Block", 2);
    rows.push(HistoryRow::new("", "North Block", "2021-09-18 08:00"));
    let file = write_csv(&rows).unwrap();

    let outcome = orchestrator(&db_path).run_file(
        "job-1",
        file.path(),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.report.total_units, 1);
    assert_eq!(outcome.report.committed_count, 1);
    assert_eq!(outcome.report.unassigned_issues.len(), 1);
    assert_eq!(outcome.report.unassigned_issues[0].row_index, Some(3));

    let statuses: Vec<String> = annotated_rows(&outcome.annotated)
        .into_iter()
        .map(|(s, _)| s)
        .collect();
    assert_eq!(statuses, vec!["OK", "OK", "ERROR"]);
}

#[test]
fn test_run_file_over_max_rows_fails_job() {
    let (_db, db_path) = create_test_db().unwrap();
    let mut rows = Vec::new();
    for code in ["F-01", "F-02", "F-03"] {
        rows.extend(unit_rows(code, "North Block", 2));
    }
    let file = write_csv(&rows).unwrap();

    let config = ImportConfig {
        max_rows: 4,
        ..ImportConfig::default()
    };
    let outcome = ImportOrchestrator::new(db_path.as_str(), config).run_file(
        "job-1",
        file.path(),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Failed);
    let fatal = outcome.report.fatal.as_ref().unwrap();
    assert_eq!(fatal.field, "rows");
    // 解析在第 max_rows + 1 行停止
    assert!(fatal.message.contains("数据行数 5 超过上限 4"));
    assert_eq!(count_rows(&db_path, "fermentation"), 0);
}

#[test]
fn test_run_file_imports_excel_dates() {
    let (_db, db_path) = create_test_db().unwrap();
    let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/history.xlsx");

    let outcome = orchestrator(&db_path).run_file(
        "job-1",
        std::path::Path::new(fixture),
        "winery-1",
        &CancellationToken::new(),
        &no_progress,
    );

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.report.committed_count, 1);

    let conn = Connection::open(&db_path).unwrap();
    let repos = SqliteRepositories::new(&conn);
    let fermentation = repos
        .fermentations
        .find_by_natural_key("winery-1", "F-01")
        .unwrap()
        .unwrap();
    assert_eq!(
        fermentation.started_at.format("%Y-%m-%d %H:%M").to_string(),
        "2021-09-15 08:00"
    );
    let samples = repos
        .samples
        .list_by_fermentation(&fermentation.fermentation_id)
        .unwrap();
    let source_rows: Vec<usize> = samples.iter().map(|s| s.source_row).collect();
    assert_eq!(source_rows, vec![1, 3]);
}
