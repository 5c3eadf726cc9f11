// ==========================================
// 发酵历史数据导入 - 领域类型定义
// ==========================================
// 职责: 导入管道共用的枚举类型（级别/状态/样本种类/酒型）
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 问题级别 (Severity)
// ==========================================
// ERROR 阻断提交，WARNING 仅提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

// ==========================================
// 导入单元状态 (Unit Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Committed, // 已在单个事务内完整落库
    Rejected,  // 校验失败或事务回滚
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Committed => write!(f, "COMMITTED"),
            UnitStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

// ==========================================
// 导入任务状态 (Job State)
// ==========================================
// 状态机: PENDING → RUNNING → (COMPLETED | CANCELLED | FAILED)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed, // 仅用于结构校验失败/源文件不可读（未处理任何单元）
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 样本种类 (Sample Kind)
// ==========================================
// 同一发酵内，同种类样本的时间戳不得重复
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleKind {
    Density,
    Sugar,
    Temperature,
}

impl SampleKind {
    pub fn as_str(&self) -> &str {
        match self {
            SampleKind::Density => "DENSITY",
            SampleKind::Sugar => "SUGAR",
            SampleKind::Temperature => "TEMPERATURE",
        }
    }

    /// 计量单位
    pub fn unit(&self) -> &str {
        match self {
            SampleKind::Density => "g/mL",
            SampleKind::Sugar => "°Brix",
            SampleKind::Temperature => "°C",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 酒型 (Wine Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WineType {
    Red,
    White,
    Rose,
    Sparkling,
    Dessert,
    Fortified,
}

impl WineType {
    pub fn as_str(&self) -> &str {
        match self {
            WineType::Red => "RED",
            WineType::White => "WHITE",
            WineType::Rose => "ROSE",
            WineType::Sparkling => "SPARKLING",
            WineType::Dessert => "DESSERT",
            WineType::Fortified => "FORTIFIED",
        }
    }

    /// 解析酒型（忽略大小写与首尾空白），未知值返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "RED" => Some(WineType::Red),
            "WHITE" => Some(WineType::White),
            "ROSE" | "ROSÉ" => Some(WineType::Rose),
            "SPARKLING" => Some(WineType::Sparkling),
            "DESSERT" => Some(WineType::Dessert),
            "FORTIFIED" => Some(WineType::Fortified),
            _ => None,
        }
    }
}

impl fmt::Display for WineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
