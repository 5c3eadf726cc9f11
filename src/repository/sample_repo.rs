// ==========================================
// 发酵历史数据导入 - 样本 Repository
// ==========================================
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::fermentation::Sample;
use crate::domain::types::SampleKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

fn parse_sample_kind(raw: &str) -> RepositoryResult<SampleKind> {
    match raw.trim() {
        "DENSITY" => Ok(SampleKind::Density),
        "SUGAR" => Ok(SampleKind::Sugar),
        "TEMPERATURE" => Ok(SampleKind::Temperature),
        other => Err(RepositoryError::FieldValueError {
            field: "kind".to_string(),
            message: format!("未知样本种类: {}", other),
        }),
    }
}

pub trait SampleRepository {
    /// 按自然键 (fermentation_id, kind, recorded_at) 查询
    fn find_by_natural_key(
        &self,
        fermentation_id: &str,
        kind: SampleKind,
        recorded_at: NaiveDateTime,
    ) -> RepositoryResult<Option<Sample>>;

    fn create(&self, sample: &Sample) -> RepositoryResult<()>;

    /// 按创建顺序列出发酵的全部样本
    fn list_by_fermentation(&self, fermentation_id: &str) -> RepositoryResult<Vec<Sample>>;
}

pub struct SqliteSampleRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSampleRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // kind 先以原始字符串带出，由 finish 解析
    fn map_row(row: &Row<'_>) -> rusqlite::Result<(Sample, String)> {
        let kind_raw: String = row.get(2)?;
        let source_row: i64 = row.get(6)?;
        Ok((
            Sample {
                sample_id: row.get(0)?,
                fermentation_id: row.get(1)?,
                kind: SampleKind::Density,
                value: row.get(3)?,
                unit: row.get(4)?,
                recorded_at: row.get(5)?,
                source_row: source_row.max(0) as usize,
                created_at: row.get(7)?,
            },
            kind_raw,
        ))
    }

    fn finish(raw: (Sample, String)) -> RepositoryResult<Sample> {
        let (mut sample, kind_raw) = raw;
        sample.kind = parse_sample_kind(&kind_raw)?;
        Ok(sample)
    }
}

impl SampleRepository for SqliteSampleRepository<'_> {
    fn find_by_natural_key(
        &self,
        fermentation_id: &str,
        kind: SampleKind,
        recorded_at: NaiveDateTime,
    ) -> RepositoryResult<Option<Sample>> {
        let raw = self
            .conn
            .query_row(
                "SELECT sample_id, fermentation_id, kind, value, unit, recorded_at,
                        source_row, created_at
                 FROM sample
                 WHERE fermentation_id = ?1 AND kind = ?2 AND recorded_at = ?3",
                params![fermentation_id, kind.as_str(), recorded_at],
                Self::map_row,
            )
            .optional()?;
        raw.map(Self::finish).transpose()
    }

    fn create(&self, sample: &Sample) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO sample (
                sample_id, fermentation_id, kind, value, unit, recorded_at,
                source_row, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sample.sample_id,
                sample.fermentation_id,
                sample.kind.as_str(),
                sample.value,
                sample.unit,
                sample.recorded_at,
                sample.source_row as i64,
                sample.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_by_fermentation(&self, fermentation_id: &str) -> RepositoryResult<Vec<Sample>> {
        let mut stmt = self.conn.prepare(
            "SELECT sample_id, fermentation_id, kind, value, unit, recorded_at,
                    source_row, created_at
             FROM sample WHERE fermentation_id = ?1
             ORDER BY rowid ASC",
        )?;

        let rows = stmt.query_map(params![fermentation_id], Self::map_row)?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(Self::finish(row?)?);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_kind() {
        assert_eq!(parse_sample_kind("SUGAR").unwrap(), SampleKind::Sugar);
        assert_eq!(
            parse_sample_kind(" TEMPERATURE ").unwrap(),
            SampleKind::Temperature
        );
        assert!(parse_sample_kind("PH").is_err());
    }
}
