// scheduler.rs - 定時任務調度器
//
// 提供「延遲執行一次」與「固定間隔重複執行」兩種任務，所有任務都可單獨取消，
// 也可在調度器關閉時一次性取消。

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

type TaskTable = DashMap<u64, AbortHandle>;

/// 已排程任務的控制柄
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    abort: AbortHandle,
    tasks: Weak<TaskTable>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消任務，已完成的任務取消無效果
    pub fn cancel(&self) {
        self.abort.abort();
        if let Some(tasks) = self.tasks.upgrade() {
            tasks.remove(&self.id);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// 任務調度器
pub struct TaskScheduler {
    tasks: Arc<TaskTable>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// 延遲 `delay` 後執行一次
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::downgrade(&self.tasks);

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            if let Some(tasks) = tasks.upgrade() {
                tasks.remove(&id);
            }
        });

        self.track(id, join.abort_handle())
    }

    /// 每隔 `interval` 執行一次；上一輪未完成前不會開始下一輪
    pub fn schedule_repeating<F, Fut>(&self, interval: Duration, mut task: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                task().await;
            }
        });

        self.track(id, join.abort_handle())
    }

    fn track(&self, id: u64, abort: AbortHandle) -> TaskHandle {
        // 關閉後排入的任務立即取消
        if self.stopped.load(Ordering::Acquire) {
            abort.abort();
        } else {
            self.tasks.insert(id, abort.clone());
        }

        TaskHandle {
            id,
            abort,
            tasks: Arc::downgrade(&self.tasks),
        }
    }

    /// 取消所有尚未完成的任務
    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, abort)) = self.tasks.remove(&id) {
                abort.abort();
            }
        }
        debug!("已取消所有排程任務");
    }

    /// 取消所有任務並拒絕之後的排程
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cancel_all();
        info!("任務調度器已停止");
    }

    /// 目前登記中的任務數
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
