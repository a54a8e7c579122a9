//! 匹配结果缓存
//! 以可检索文本的128位指纹为键缓存非空识别结果
//!
//! - 条目自写入起固定存活 TTL，过期条目由单个后台清理任务按周期移除，写入时也会顺带清理
//! - 查询路径只访问条目映射，不获取过期索引的锁
//! - 条目记录写入时的代数，`invalidate_all` 之后旧代数的条目一律不会被返回
//! - 条目数量有上限，超限时淘汰最早过期的条目
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use crate::logging::{debug, trace};

use crate::error::{RsbResult, RsbannerError};
use crate::rule::ServiceInfo;

/// 缓存键：可检索文本的128位指纹
pub type CacheKey = u128;

// 两次独立种子的 SipHash 拼接为128位
const FINGERPRINT_SEEDS: (u64, u64) = (0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344);

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<ServiceInfo>,
    expires_at: Instant,
    generation: u64,
}

/// 匹配结果缓存
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    // 过期索引：堆顶为最早过期的条目
    expiry: Mutex<BinaryHeap<Reverse<(Instant, CacheKey)>>>,
    generation: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

impl ResultCache {
    /// 创建缓存，`capacity` 为0时不缓存任何内容
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            expiry: Mutex::new(BinaryHeap::new()),
            generation: AtomicU64::new(0),
            ttl,
            capacity,
        }
    }

    /// 计算可检索文本的缓存键
    pub fn fingerprint(text: &str) -> CacheKey {
        let half = |seed: u64| {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            text.hash(&mut hasher);
            hasher.finish()
        };
        (u128::from(half(FINGERPRINT_SEEDS.0)) << 64) | u128::from(half(FINGERPRINT_SEEDS.1))
    }

    /// 当前代数，调用方在求值前读取，写入时原样带回
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// 查询缓存，过期或代数过旧的条目视为不存在
    pub fn get(&self, key: CacheKey) -> Option<Vec<ServiceInfo>> {
        let now = Instant::now();
        let generation = self.generation();

        {
            let entry = self.entries.get(&key)?;
            if entry.generation == generation && entry.expires_at > now {
                return Some(entry.results.clone());
            }
        }

        self.entries
            .remove_if(&key, |_, e| e.generation != generation || e.expires_at <= now);
        None
    }

    /// 写入缓存
    /// 空结果不缓存；`generation` 与当前代数不一致说明期间发生过失效，结果丢弃
    ///
    /// 条目写入与过期记录在同一把锁内完成，映射中的每个条目在堆中都有对应记录
    pub fn put(&self, key: CacheKey, results: Vec<ServiceInfo>, generation: u64) {
        if results.is_empty() || self.capacity == 0 {
            return;
        }

        let mut heap = self.expiry.lock();
        if generation != self.generation() {
            trace!("Dropping cache write from stale generation {}", generation);
            return;
        }

        let now = Instant::now();
        self.sweep_heap(&mut heap, now);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_for_insert(&mut heap);
        }

        let expires_at = now + self.ttl;
        self.entries.insert(
            key,
            CacheEntry {
                results,
                expires_at,
                generation,
            },
        );
        heap.push(Reverse((expires_at, key)));
    }

    /// 移除所有已过期条目，返回移除数量
    pub fn sweep(&self) -> usize {
        let mut heap = self.expiry.lock();
        self.sweep_heap(&mut heap, Instant::now())
    }

    /// 清空缓存并推进代数
    pub fn invalidate_all(&self) {
        let mut heap = self.expiry.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        heap.clear();
        drop(heap);
        debug!("Result cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn sweep_heap(&self, heap: &mut BinaryHeap<Reverse<(Instant, CacheKey)>>, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(Reverse((expires_at, key))) = heap.peek().copied() {
            if expires_at > now {
                break;
            }
            heap.pop();
            if self.entries.remove_if(&key, |_, e| e.expires_at <= now).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            trace!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// 按过期时间从早到晚淘汰，直到腾出一个位置
    fn evict_for_insert(&self, heap: &mut BinaryHeap<Reverse<(Instant, CacheKey)>>) {
        while self.entries.len() >= self.capacity {
            let Some(Reverse((expires_at, key))) = heap.pop() else {
                break;
            };
            // 堆中可能残留已被覆盖条目的旧记录
            if self
                .entries
                .remove_if(&key, |_, e| e.expires_at == expires_at)
                .is_some()
            {
                trace!("Evicted cache entry {:032x}", key);
            }
        }
    }
}

/// 后台缓存清理任务（每个缓存一个），缓存被释放或句柄被丢弃时结束
#[derive(Debug)]
pub struct CacheSweeper {
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// 在当前 tokio 运行时中启动清理任务
    pub fn spawn(cache: &Arc<ResultCache>, interval: Duration) -> RsbResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RsbannerError::AsyncTaskError(format!("cache sweeper needs a tokio runtime: {}", e)))?;

        let cache: Weak<ResultCache> = Arc::downgrade(cache);
        let period = interval.max(Duration::from_millis(1));

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Result cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Cache sweeper removed {} expired entries", removed);
                }
            }
        });

        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 停止清理任务
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn result(rule_id: &str) -> Vec<ServiceInfo> {
        vec![ServiceInfo {
            name: "ssh".to_string(),
            product: "OpenSSH".to_string(),
            version: String::new(),
            info: String::new(),
            hostname: String::new(),
            os: String::new(),
            device_type: String::new(),
            cpe: String::new(),
            confidence: 90,
            rule_id: rule_id.to_string(),
            matched_text: "SSH-2.0".to_string(),
        }]
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        assert_eq!(ResultCache::fingerprint("abc"), ResultCache::fingerprint("abc"));
        assert_ne!(ResultCache::fingerprint("abc"), ResultCache::fingerprint("abd"));
    }

    #[test]
    fn test_put_get_and_skip_empty() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let generation = cache.generation();

        cache.put(1, result("a"), generation);
        cache.put(2, Vec::new(), generation);

        assert_eq!(cache.get(1).unwrap()[0].rule_id, "a");
        assert!(cache.get(2).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_swept_without_lookup() {
        let cache = ResultCache::new(Duration::from_millis(20), 10);
        cache.put(1, result("a"), cache.generation());
        cache.put(2, result("b"), cache.generation());

        sleep(Duration::from_millis(40));
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_generation_is_never_served() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let before = cache.generation();

        cache.put(1, result("old"), before);
        cache.invalidate_all();
        assert!(cache.get(1).is_none());

        // 失效前开始的求值，结果在失效后才写入
        cache.put(1, result("late"), before);
        assert!(cache.get(1).is_none());

        cache.put(1, result("new"), cache.generation());
        assert_eq!(cache.get(1).unwrap()[0].rule_id, "new");
    }

    #[test]
    fn test_capacity_evicts_earliest_expiring() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        let generation = cache.generation();

        cache.put(1, result("first"), generation);
        sleep(Duration::from_millis(2));
        cache.put(2, result("second"), generation);
        sleep(Duration::from_millis(2));
        cache.put(3, result("third"), generation);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_sweep_after_invalidation_race_leaves_nothing_behind() {
        let cache = ResultCache::new(Duration::from_millis(5), 100_000);

        std::thread::scope(|scope| {
            for writer in 0..8u128 {
                let cache = &cache;
                scope.spawn(move || {
                    for n in 0..2_000u128 {
                        cache.put((writer << 32) | n, result("w"), cache.generation());
                    }
                });
            }
            for _ in 0..200 {
                cache.invalidate_all();
                std::thread::yield_now();
            }
        });

        sleep(Duration::from_millis(50));
        cache.sweep();
        assert!(cache.is_empty());
        assert!(cache.expiry.lock().is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = ResultCache::new(Duration::from_secs(60), 0);
        cache.put(1, result("a"), cache.generation());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_background_sweeper_removes_expired_entries() {
        let cache = Arc::new(ResultCache::new(Duration::from_millis(10), 10));
        let sweeper = CacheSweeper::spawn(&cache, Duration::from_millis(10)).unwrap();

        cache.put(1, result("a"), cache.generation());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        // 缓存释放后任务自行退出
        drop(cache);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sweeper.is_finished());
    }

    #[test]
    fn test_sweeper_requires_runtime() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(1), 10));
        assert!(matches!(
            CacheSweeper::spawn(&cache, Duration::from_secs(1)),
            Err(RsbannerError::AsyncTaskError(_))
        ));
    }
}
