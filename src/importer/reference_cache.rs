// ==========================================
// 发酵历史数据导入 - 引用实体缓存
// ==========================================
// 职责: 葡萄园 / 默认地块按自然键解析一次，任务内复用
// 生命周期: 每个导入任务一个实例，任务结束即丢弃
// 事务: 新建的引用实体在单元事务内写入，
//       单元提交后才发布到缓存，回滚则释放槽位
// 并发: 同一键的首次解析单飞（single-flight），
//       并发调用方等待槽位发布或释放；释放后由等待方重新解析
// ==========================================

use crate::domain::vineyard::{Vineyard, VineyardBlock};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::reference_store::ReferenceStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use tracing::debug;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceCacheStats {
    pub lookups: usize, // 访问存储的查询次数
    pub creates: usize, // 新建次数
    pub hits: usize,    // 直接命中缓存次数
}

// ==========================================
// SlotTable - 按键的槽位表
// ==========================================
// Pending: 某个单元正在解析（新建的实体尚未提交）
// Ready: 已提交，可直接复用
enum Slot<T> {
    Pending,
    Ready(T),
}

enum Claim<T> {
    Ready(T),
    Reserved,
}

struct SlotTable<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    changed: Condvar,
}

fn lock_err<E: std::fmt::Display>(e: E) -> RepositoryError {
    RepositoryError::LockError(format!("锁获取失败: {}", e))
}

impl<T: Clone> SlotTable<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
        }
    }

    /// 取已发布的值，或占用空槽位；槽位被占用时阻塞等待
    fn claim(&self, key: &str) -> RepositoryResult<Claim<T>> {
        let mut slots = self.slots.lock().map_err(lock_err)?;
        loop {
            match slots.get(key) {
                Some(Slot::Ready(value)) => return Ok(Claim::Ready(value.clone())),
                Some(Slot::Pending) => {
                    slots = self.changed.wait(slots).map_err(lock_err)?;
                }
                None => {
                    slots.insert(key.to_string(), Slot::Pending);
                    return Ok(Claim::Reserved);
                }
            }
        }
    }

    fn publish(&self, key: String, value: T) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key, Slot::Ready(value));
        self.changed.notify_all();
    }

    fn release(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slots.get(key), Some(Slot::Pending)) {
            slots.remove(key);
        }
        self.changed.notify_all();
    }
}

// ==========================================
// ReferenceCache
// ==========================================
pub struct ReferenceCache {
    tenant_id: String,
    vineyards: SlotTable<Vineyard>,  // key: 葡萄园名称
    blocks: SlotTable<VineyardBlock>, // key: vineyard_id
    lookups: AtomicUsize,
    creates: AtomicUsize,
    hits: AtomicUsize,
}

impl ReferenceCache {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            vineyards: SlotTable::new(),
            blocks: SlotTable::new(),
            lookups: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn stats(&self) -> ReferenceCacheStats {
        ReferenceCacheStats {
            lookups: self.lookups.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::SeqCst),
        }
    }

    /// 为一个单元开启解析；单元事务提交后调用 commit，否则丢弃即释放
    pub fn reserve(&self) -> ReferenceReservation<'_> {
        ReferenceReservation {
            cache: self,
            vineyards: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

// ==========================================
// ReferenceReservation - 单元内新建、尚未提交的引用实体
// ==========================================
pub struct ReferenceReservation<'a> {
    cache: &'a ReferenceCache,
    vineyards: Vec<(String, Vineyard)>,
    blocks: Vec<(String, VineyardBlock)>,
}

impl ReferenceReservation<'_> {
    /// 按名称解析葡萄园，不存在则在 store 所在事务内创建
    pub fn resolve_or_create_vineyard<S: ReferenceStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
    ) -> RepositoryResult<Vineyard> {
        let cache = self.cache;
        let tenant_id = cache.tenant_id.as_str();
        resolve(
            cache,
            &cache.vineyards,
            &mut self.vineyards,
            name,
            || store.find_vineyard(tenant_id, name),
            || store.create_vineyard(tenant_id, name),
        )
    }

    /// 解析葡萄园的默认地块，不存在则创建
    pub fn resolve_or_create_default_block<S: ReferenceStore + ?Sized>(
        &mut self,
        store: &S,
        vineyard_id: &str,
    ) -> RepositoryResult<VineyardBlock> {
        let cache = self.cache;
        resolve(
            cache,
            &cache.blocks,
            &mut self.blocks,
            vineyard_id,
            || store.find_default_block(vineyard_id),
            || store.create_default_block(vineyard_id),
        )
    }

    /// 单元事务已提交：发布新建的实体
    pub fn commit(mut self) {
        for (key, vineyard) in self.vineyards.drain(..) {
            self.cache.vineyards.publish(key, vineyard);
        }
        for (key, block) in self.blocks.drain(..) {
            self.cache.blocks.publish(key, block);
        }
    }
}

impl Drop for ReferenceReservation<'_> {
    // 未提交的槽位全部释放，等待方将重新解析
    fn drop(&mut self) {
        for (key, _) in self.vineyards.drain(..) {
            debug!(key = %key, "单元未提交，释放葡萄园槽位");
            self.cache.vineyards.release(&key);
        }
        for (key, _) in self.blocks.drain(..) {
            self.cache.blocks.release(&key);
        }
    }
}

fn resolve<T, L, C>(
    cache: &ReferenceCache,
    table: &SlotTable<T>,
    pending: &mut Vec<(String, T)>,
    key: &str,
    lookup: L,
    create: C,
) -> RepositoryResult<T>
where
    T: Clone,
    L: FnOnce() -> RepositoryResult<Option<T>>,
    C: FnOnce() -> RepositoryResult<T>,
{
    // 本单元已新建的实体（槽位由自己占用，不能等待）
    if let Some((_, value)) = pending.iter().find(|(k, _)| k == key) {
        return Ok(value.clone());
    }

    if let Claim::Ready(value) = table.claim(key)? {
        cache.hits.fetch_add(1, Ordering::SeqCst);
        return Ok(value);
    }

    cache.lookups.fetch_add(1, Ordering::SeqCst);
    let found = match lookup() {
        Ok(found) => found,
        Err(e) => {
            table.release(key);
            return Err(e);
        }
    };

    if let Some(existing) = found {
        // 已提交的实体可立即发布
        debug!(key, "引用实体已存在，复用");
        table.publish(key.to_string(), existing.clone());
        return Ok(existing);
    }

    cache.creates.fetch_add(1, Ordering::SeqCst);
    debug!(key, "引用实体不存在，新建");
    match create() {
        Ok(created) => {
            pending.push((key.to_string(), created.clone()));
            Ok(created)
        }
        Err(e) => {
            table.release(key);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vineyard::DEFAULT_BLOCK_CODE;
    use chrono::Utc;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    // 计数的内存存储（写入立即可见，模拟已提交）
    #[derive(Default)]
    struct CountingStore {
        vineyards: Mutex<HashMap<(String, String), Vineyard>>,
        blocks: Mutex<HashMap<String, VineyardBlock>>,
        find_calls: AtomicUsize,
        create_calls: AtomicUsize,
        fail_next_create: AtomicBool,
    }

    impl ReferenceStore for CountingStore {
        fn find_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Option<Vineyard>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            let map = self.vineyards.lock().unwrap();
            Ok(map.get(&(tenant_id.to_string(), name.to_string())).cloned())
        }

        fn create_vineyard(&self, tenant_id: &str, name: &str) -> RepositoryResult<Vineyard> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next_create.swap(false, Ordering::SeqCst) {
                return Err(RepositoryError::DatabaseQueryError("disk I/O error".to_string()));
            }
            // 放大并发窗口
            thread::sleep(Duration::from_millis(20));
            let vineyard = Vineyard {
                vineyard_id: format!("v-{}", name),
                tenant_id: tenant_id.to_string(),
                name: name.to_string(),
                created_at: Utc::now(),
            };
            self.vineyards
                .lock()
                .unwrap()
                .insert((tenant_id.to_string(), name.to_string()), vineyard.clone());
            Ok(vineyard)
        }

        fn find_default_block(&self, vineyard_id: &str) -> RepositoryResult<Option<VineyardBlock>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.blocks.lock().unwrap().get(vineyard_id).cloned())
        }

        fn create_default_block(&self, vineyard_id: &str) -> RepositoryResult<VineyardBlock> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let block = VineyardBlock {
                block_id: format!("b-{}", vineyard_id),
                vineyard_id: vineyard_id.to_string(),
                code: DEFAULT_BLOCK_CODE.to_string(),
                is_default: true,
                created_at: Utc::now(),
            };
            self.blocks
                .lock()
                .unwrap()
                .insert(vineyard_id.to_string(), block.clone());
            Ok(block)
        }
    }

    impl CountingStore {
        // 模拟事务回滚：丢弃已写入的葡萄园
        fn roll_back(&self) {
            self.vineyards.lock().unwrap().clear();
        }
    }

    #[test]
    fn test_committed_resolution_hits_cache() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");

        let mut first = cache.reserve();
        let created = first.resolve_or_create_vineyard(&store, "North Block").unwrap();
        first.commit();

        let mut second = cache.reserve();
        let cached = second.resolve_or_create_vineyard(&store, "North Block").unwrap();
        second.commit();

        assert_eq!(created.vineyard_id, cached.vineyard_id);
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            ReferenceCacheStats {
                lookups: 1,
                creates: 1,
                hits: 1
            }
        );
    }

    #[test]
    fn test_same_reservation_reuses_its_pending_entity() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");

        let mut reservation = cache.reserve();
        let a = reservation.resolve_or_create_vineyard(&store, "North Block").unwrap();
        let b = reservation.resolve_or_create_vineyard(&store, "North Block").unwrap();
        reservation.commit();

        assert_eq!(a.vineyard_id, b.vineyard_id);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_existing_entity_is_reused_without_create() {
        let store = CountingStore::default();
        store.create_vineyard("winery-1", "South Slope").unwrap();
        store.create_calls.store(0, Ordering::SeqCst);

        let cache = ReferenceCache::new("winery-1");
        let mut reservation = cache.reserve();
        let vineyard = reservation
            .resolve_or_create_vineyard(&store, "South Slope")
            .unwrap();
        drop(reservation);

        // 已提交的实体在查询时即发布，不随预留丢弃
        let mut again = cache.reserve();
        again.resolve_or_create_vineyard(&store, "South Slope").unwrap();

        assert_eq!(vineyard.vineyard_id, "v-South Slope");
        assert_eq!(cache.stats().creates, 0);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_default_block_per_vineyard() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");

        let mut first = cache.reserve();
        let vineyard = first.resolve_or_create_vineyard(&store, "North Block").unwrap();
        let a = first
            .resolve_or_create_default_block(&store, &vineyard.vineyard_id)
            .unwrap();
        first.commit();

        let mut second = cache.reserve();
        let b = second
            .resolve_or_create_default_block(&store, &vineyard.vineyard_id)
            .unwrap();

        assert_eq!(a.block_id, b.block_id);
        assert_eq!(store.blocks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_reservation_is_not_cached() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");

        let mut aborted = cache.reserve();
        aborted.resolve_or_create_vineyard(&store, "Lonely Hill").unwrap();
        store.roll_back();
        drop(aborted);

        let mut retry = cache.reserve();
        let vineyard = retry.resolve_or_create_vineyard(&store, "Lonely Hill").unwrap();
        retry.commit();

        assert_eq!(vineyard.name, "Lonely Hill");
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_waiter_resolves_again_after_owner_rolls_back() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");
        let owner_reserved = Barrier::new(2);

        thread::scope(|s| {
            let owner = s.spawn(|| {
                let mut reservation = cache.reserve();
                reservation.resolve_or_create_vineyard(&store, "North Block").unwrap();
                owner_reserved.wait();
                // 等待方此时阻塞在槽位上
                thread::sleep(Duration::from_millis(50));
                store.roll_back();
                drop(reservation);
            });

            owner_reserved.wait();
            let mut reservation = cache.reserve();
            let vineyard = reservation
                .resolve_or_create_vineyard(&store, "North Block")
                .unwrap();
            reservation.commit();
            owner.join().unwrap();

            assert_eq!(vineyard.name, "North Block");
        });

        assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().creates, 2);
    }

    #[test]
    fn test_concurrent_first_access_is_single_flight() {
        let store = CountingStore::default();
        let cache = ReferenceCache::new("winery-1");

        let ids: Vec<String> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let mut reservation = cache.reserve();
                        let vineyard = reservation
                            .resolve_or_create_vineyard(&store, "North Block")
                            .unwrap();
                        reservation.commit();
                        vineyard
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().vineyard_id)
                .collect()
        });

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 7);
    }

    #[test]
    fn test_failed_create_releases_slot() {
        let store = CountingStore::default();
        store.fail_next_create.store(true, Ordering::SeqCst);
        let cache = ReferenceCache::new("winery-1");

        let mut reservation = cache.reserve();
        assert!(reservation
            .resolve_or_create_vineyard(&store, "North Block")
            .is_err());
        let retried = reservation
            .resolve_or_create_vineyard(&store, "North Block")
            .unwrap();
        reservation.commit();

        assert_eq!(retried.name, "North Block");
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);
    }
}
