// ==========================================
// 发酵历史数据导入 - 葡萄园与采收领域模型
// ==========================================
// 红线: 跨聚合只保存外键 ID，不持有对象引用
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Vineyard - 葡萄园（引用实体）
// ==========================================
// 自然键: (tenant_id, name)
// 用途: 导入任务内按名称解析一次，跨单元复用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vineyard {
    pub vineyard_id: String, // UUID
    pub tenant_id: String,   // 租户（酒庄）
    pub name: String,        // 葡萄园名称
    pub created_at: DateTime<Utc>,
}

// ==========================================
// VineyardBlock - 葡萄园地块（占位子实体）
// ==========================================
// 源数据没有地块层级，每个葡萄园只创建一个默认地块
// 自然键: (vineyard_id, is_default = 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VineyardBlock {
    pub block_id: String,
    pub vineyard_id: String, // FK → vineyard
    pub code: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// 默认地块编码
pub const DEFAULT_BLOCK_CODE: &str = "DEFAULT";

// ==========================================
// HarvestLot - 采收批次（叶子记录）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestLot {
    pub harvest_lot_id: String,
    pub tenant_id: String,
    pub block_id: String,      // FK → vineyard_block
    pub code: String,          // 与发酵编号一致
    pub harvest_date: NaiveDate,
    pub mass_kg: f64,          // 采收总重量（kg）
    pub grape_variety: String, // 品种
    pub created_at: DateTime<Utc>,
}
