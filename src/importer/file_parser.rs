// ==========================================
// 发酵历史数据导入 - 文件解析器实现
// ==========================================
// 职责: 源文件 → ParsedSource（表头 + 有序源记录）
// 支持: Excel (.xlsx/.xls) / CSV (.csv)
// 行号: 数据行号从 1 开始（不含表头），空白行跳过但计入行号
// 行数上限: 读到 max_rows + 1 条非空记录即停止，超限由结构校验报告
// ==========================================

use crate::domain::import::{ParsedSource, SourceRecord};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::importer_trait::FileParser;
use calamine::{open_workbook, open_workbook_auto, Data, DataType, Reader, Xlsx};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::mem;
use std::path::Path;
use tracing::debug;

/// 按表头组装一行；完全空白的行返回 None
fn build_row(
    headers: &[String],
    cells: impl Iterator<Item = String>,
) -> Option<HashMap<String, String>> {
    let mut row_map = HashMap::new();
    for (col_idx, value) in cells.enumerate() {
        if let Some(header) = headers.get(col_idx) {
            row_map.insert(header.clone(), value.trim().to_string());
        }
    }

    if row_map.values().all(|v| v.is_empty()) {
        return None;
    }
    Some(row_map)
}

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// 已读记录数是否超过上限（多读 1 条，让结构校验能识别超限）
fn limit_exceeded(row_limit: Option<usize>, read: usize) -> bool {
    row_limit.is_some_and(|limit| read > limit)
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvParser {
    row_limit: Option<usize>,
}

impl CsvParser {
    pub fn with_row_limit(max_rows: usize) -> Self {
        Self {
            row_limit: Some(max_rows),
        }
    }

    /// 从任意 Reader 解析 CSV（文件/内存字节）
    pub fn parse_reader<R: Read>(&self, reader: R) -> ImportResult<ParsedSource> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            // csv 会跳过物理空行，用文件行号还原数据行号（表头占第 1 行）
            let row_index = record
                .position()
                .map(|p| (p.line() as usize).saturating_sub(1))
                .filter(|line| *line > 0)
                .unwrap_or(idx + 1);

            if let Some(values) = build_row(&headers, record.iter().map(str::to_string)) {
                records.push(SourceRecord::new(row_index, values));
            }
            if limit_exceeded(self.row_limit, records.len()) {
                debug!(read = records.len(), "CSV 行数超过上限，停止读取");
                break;
            }
        }

        Ok(ParsedSource::new(headers, records))
    }
}

impl FileParser for CsvParser {
    fn parse(&self, file_path: &Path) -> ImportResult<ParsedSource> {
        ensure_exists(file_path)?;

        if let Some(ext) = file_path.extension() {
            if !ext.eq_ignore_ascii_case("csv") {
                return Err(ImportError::UnsupportedFormat(
                    ext.to_string_lossy().to_string(),
                ));
            }
        }

        let file = File::open(file_path)?;
        self.parse_reader(file)
    }
}

// ==========================================
// Excel 单元格 → 文本
// ==========================================
// 日期格式单元格按 Excel 序列号存储，转为字段映射可识别的文本:
// 零点 → %Y-%m-%d，其余 → %Y-%m-%d %H:%M:%S（四舍五入到秒）
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(value) => format_datetime(value),
            None => cell.to_string(),
        },
        _ => cell.to_string(),
    }
}

fn format_datetime(value: NaiveDateTime) -> String {
    let rounded = value + Duration::milliseconds(500);
    let rounded = rounded.with_nanosecond(0).unwrap_or(rounded);
    if rounded.time() == NaiveTime::MIN {
        rounded.format("%Y-%m-%d").to_string()
    } else {
        rounded.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

// ==========================================
// SheetCollector - 按单元格流组装记录
// ==========================================
// 单元格按行优先顺序到达；首个非空行为表头
// 数据行号 = 工作表行号 - 表头行号（工作表中缺失的空行同样计入）
struct SheetCollector {
    row_limit: Option<usize>,
    header_row: Option<usize>,
    headers: Vec<String>,
    header_cols: HashMap<usize, String>,
    current_row: Option<usize>,
    cells: Vec<(usize, String)>,
    records: Vec<SourceRecord>,
}

impl SheetCollector {
    fn new(row_limit: Option<usize>) -> Self {
        Self {
            row_limit,
            header_row: None,
            headers: Vec::new(),
            header_cols: HashMap::new(),
            current_row: None,
            cells: Vec::new(),
            records: Vec::new(),
        }
    }

    fn push(&mut self, row: usize, col: usize, text: String) {
        if self.current_row != Some(row) {
            self.flush();
            self.current_row = Some(row);
        }
        self.cells.push((col, text));
    }

    fn is_full(&self) -> bool {
        limit_exceeded(self.row_limit, self.records.len())
    }

    fn flush(&mut self) {
        let cells = mem::take(&mut self.cells);
        let Some(row) = self.current_row else {
            return;
        };
        if cells.iter().all(|(_, text)| text.trim().is_empty()) {
            return;
        }

        match self.header_row {
            None => {
                self.header_row = Some(row);
                for (col, text) in cells {
                    let header = text.trim().to_string();
                    if header.is_empty() {
                        continue;
                    }
                    self.header_cols.insert(col, header.clone());
                    self.headers.push(header);
                }
            }
            Some(header_row) => {
                let values: HashMap<String, String> = cells
                    .into_iter()
                    .filter_map(|(col, text)| {
                        self.header_cols
                            .get(&col)
                            .map(|header| (header.clone(), text.trim().to_string()))
                    })
                    .collect();
                self.records
                    .push(SourceRecord::new(row - header_row, values));
            }
        }
    }

    fn finish(mut self) -> ImportResult<ParsedSource> {
        if !self.is_full() {
            self.flush();
        }
        if self.header_row.is_none() {
            return Err(ImportError::ExcelParseError("Excel 文件无表头行".to_string()));
        }
        Ok(ParsedSource::new(self.headers, self.records))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
// 只读取第一个工作表
// .xlsx 逐单元格流式读取，达到行数上限即停止；.xls 由 calamine 整表载入
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelParser {
    row_limit: Option<usize>,
}

impl ExcelParser {
    pub fn with_row_limit(max_rows: usize) -> Self {
        Self {
            row_limit: Some(max_rows),
        }
    }

    fn parse_xlsx(&self, file_path: &Path) -> ImportResult<ParsedSource> {
        let mut workbook: Xlsx<_> = open_workbook(file_path)
            .map_err(|e: calamine::XlsxError| ImportError::ExcelParseError(e.to_string()))?;
        let sheet_name = first_sheet(workbook.sheet_names())?;

        let mut cells = workbook
            .worksheet_cells_reader(&sheet_name)
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

        let mut collector = SheetCollector::new(self.row_limit);
        while let Some(cell) = cells
            .next_cell()
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?
        {
            let (row, col) = cell.get_position();
            let value = Data::from(cell.get_value().clone());
            collector.push(row as usize, col as usize, cell_text(&value));
            if collector.is_full() {
                debug!(read = collector.records.len(), "Excel 行数超过上限，停止读取");
                break;
            }
        }

        collector.finish()
    }

    fn parse_workbook(&self, file_path: &Path) -> ImportResult<ParsedSource> {
        let mut workbook = open_workbook_auto(file_path)?;
        let sheet_name = first_sheet(workbook.sheet_names())?;
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut collector = SheetCollector::new(self.row_limit);
        for (row, col, value) in range.cells() {
            collector.push(row, col, cell_text(value));
            if collector.is_full() {
                break;
            }
        }

        collector.finish()
    }
}

fn first_sheet(names: Vec<String>) -> ImportResult<String> {
    names
        .into_iter()
        .next()
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))
}

impl FileParser for ExcelParser {
    fn parse(&self, file_path: &Path) -> ImportResult<ParsedSource> {
        ensure_exists(file_path)?;

        match lowercase_extension(file_path).as_str() {
            "xlsx" => self.parse_xlsx(file_path),
            "xls" => self.parse_workbook(file_path),
            ext => Err(ImportError::UnsupportedFormat(ext.to_string())),
        }
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversalFileParser {
    row_limit: Option<usize>,
}

impl UniversalFileParser {
    pub fn with_row_limit(max_rows: usize) -> Self {
        Self {
            row_limit: Some(max_rows),
        }
    }
}

impl FileParser for UniversalFileParser {
    fn parse(&self, file_path: &Path) -> ImportResult<ParsedSource> {
        let ext = lowercase_extension(file_path);

        match ext.as_str() {
            "csv" => CsvParser {
                row_limit: self.row_limit,
            }
            .parse(file_path),
            "xlsx" | "xls" => ExcelParser {
                row_limit: self.row_limit,
            }
            .parse(file_path),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}
