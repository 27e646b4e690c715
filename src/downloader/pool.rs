//! 有界并发的工作池
//!
//! 队列先进先出，`active` 计数充当信号量。每个 worker 循环取任务，
//! 队列为空或并发数超过上限时退出。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Worker<T: Send + 'static>: Send + Sync + 'static {
    async fn process(self: Arc<Self>, item: T);
}

struct PoolState<T> {
    queue: VecDeque<T>,
    active: usize,
    limit: usize,
}

pub struct WorkerPool<T> {
    name: &'static str,
    state: Arc<Mutex<PoolState<T>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: 0,
                limit: limit.max(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        lock_state(&self.state)
    }

    pub fn push(&self, item: T) {
        self.lock().queue.push_back(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.lock().queue.extend(items);
    }

    /// 移除尚未开始的任务，返回移除数量
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut state = self.lock();
        let before = state.queue.len();
        state.queue.retain(|item| keep(item));
        before - state.queue.len()
    }

    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.active == 0 && state.queue.is_empty()
    }

    /// 调整并发上限后立即尝试启动更多 worker，不会打断正在执行的任务
    pub fn set_limit<W: Worker<T>>(&self, limit: usize, worker: &Arc<W>) {
        let limit = limit.max(1);
        self.lock().limit = limit;
        debug!("{} 并发上限调整为 {}", self.name, limit);
        self.pump(worker);
    }

    /// 在并发上限内为队列中的任务启动 worker
    pub fn pump<W: Worker<T>>(&self, worker: &Arc<W>) {
        loop {
            let item = {
                let mut state = self.lock();
                if state.active >= state.limit {
                    break;
                }
                let Some(item) = state.queue.pop_front() else {
                    break;
                };
                state.active += 1;
                item
            };

            let state = Arc::clone(&self.state);
            let worker = Arc::clone(worker);
            tokio::spawn(async move {
                let mut item = item;
                loop {
                    Arc::clone(&worker).process(item).await;
                    let next = {
                        let mut state = lock_state(&state);
                        let next = if state.active <= state.limit {
                            state.queue.pop_front()
                        } else {
                            None
                        };
                        if next.is_none() {
                            state.active -= 1;
                        }
                        next
                    };
                    match next {
                        Some(n) => item = n,
                        None => break,
                    }
                }
            });
        }
    }
}

fn lock_state<T>(state: &Mutex<PoolState<T>>) -> MutexGuard<'_, PoolState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Worker<u32> for Recorder {
        async fn process(self: Arc<Self>, item: u32) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.lock().unwrap().push(item);
        }
    }

    async fn wait_idle<T: Send + 'static>(pool: &WorkerPool<T>) {
        while !pool.is_idle() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let pool = WorkerPool::new("test", 3);
        let worker = Arc::new(Recorder::default());
        pool.extend(0..20);
        pool.pump(&worker);
        assert_eq!(pool.active(), 3);
        wait_idle(&pool).await;
        assert_eq!(worker.peak.load(Ordering::SeqCst), 3);
        assert_eq!(worker.done.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn single_worker_keeps_fifo_order() {
        let pool = WorkerPool::new("test", 1);
        let worker = Arc::new(Recorder::default());
        pool.extend([5, 1, 4]);
        pool.pump(&worker);
        wait_idle(&pool).await;
        assert_eq!(*worker.done.lock().unwrap(), vec![5, 1, 4]);
    }

    #[tokio::test]
    async fn raising_limit_starts_more_workers() {
        let pool = WorkerPool::new("test", 1);
        let worker = Arc::new(Recorder::default());
        pool.extend(0..10);
        pool.pump(&worker);
        assert_eq!(pool.active(), 1);
        pool.set_limit(4, &worker);
        assert_eq!(pool.active(), 4);
        wait_idle(&pool).await;
        assert_eq!(worker.done.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped() {
        let pool: WorkerPool<u32> = WorkerPool::new("test", 0);
        assert_eq!(pool.limit(), 1);
    }

    #[tokio::test]
    async fn retain_drops_queued_items() {
        let pool = WorkerPool::new("test", 1);
        pool.extend(0..6);
        assert_eq!(pool.retain(|n| n % 2 == 0), 3);
        assert_eq!(pool.queued(), 3);
    }
}
