// ==========================================
// 发酵历史数据导入 - 事务作用域
// ==========================================
// 职责: 把各聚合的 Repository 绑定到同一事务
// 规则:
// - 每个导入单元一个作用域，不嵌套
// - 闭包返回 Ok → 提交；返回 Err → 回滚并原样传播
// - 每个 worker 持有独立连接，单元之间事务互相独立
// ==========================================

use crate::repository::error::RepositoryError;
use crate::repository::SqliteRepositories;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, warn};

pub struct TransactionScope<'c> {
    conn: &'c mut Connection,
}

impl<'c> TransactionScope<'c> {
    pub fn new(conn: &'c mut Connection) -> Self {
        Self { conn }
    }

    /// 在单个事务内执行 f
    pub fn run<T, E, F>(self, f: F) -> Result<T, E>
    where
        E: From<RepositoryError>,
        F: FnOnce(&SqliteRepositories<'_>) -> Result<T, E>,
    {
        // IMMEDIATE: 开启即取写锁，并发 worker 在 busy_timeout 内排队
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        let outcome = {
            let repos = SqliteRepositories::new(&tx);
            f(&repos)
        };

        match outcome {
            Ok(value) => {
                tx.commit().map_err(RepositoryError::from)?;
                debug!("事务已提交");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "事务回滚失败");
                } else {
                    debug!("事务已回滚");
                }
                Err(e)
            }
        }
    }
}
