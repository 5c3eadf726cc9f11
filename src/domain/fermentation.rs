// ==========================================
// 发酵历史数据导入 - 发酵领域模型
// ==========================================
// 职责: 发酵/原料来源/样本实体
// 红线: 跨聚合只保存外键 ID
// ==========================================

use crate::domain::types::{SampleKind, WineType};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Fermentation - 发酵（过程记录）
// ==========================================
// 自然键: (tenant_id, code)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fermentation {
    pub fermentation_id: String,
    pub tenant_id: String,
    pub code: String,                 // 发酵编号（导入单元键）
    pub vineyard_id: String,          // FK → vineyard（仅外键）
    pub grape_variety: String,
    pub wine_type: Option<WineType>,
    pub input_mass_kg: f64,           // 投料重量
    pub started_at: NaiveDateTime,    // 首个样本时间
    pub is_historical: bool,          // 历史导入数据标记
    pub created_at: DateTime<Utc>,
}

// ==========================================
// FermentationLotSource - 原料来源关联
// ==========================================
// 单一来源: mass_used_kg 必须等于采收批次总重量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FermentationLotSource {
    pub lot_source_id: String,
    pub fermentation_id: String, // FK → fermentation
    pub harvest_lot_id: String,  // FK → harvest_lot
    pub mass_used_kg: f64,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// Sample - 样本（测量记录）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sample_id: String,
    pub fermentation_id: String, // FK → fermentation
    pub kind: SampleKind,
    pub value: f64,
    pub unit: String,
    pub recorded_at: NaiveDateTime,
    pub source_row: usize,       // 源文件行号（追溯用）
    pub created_at: DateTime<Utc>,
}
