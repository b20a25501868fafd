use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 后台工作线程的状态快照
///
/// `timestamp` 是该组件最近一次成功处理的 pts（各组件自定单位语义）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    /// true 时线程循环执行工作体
    pub running: bool,
    /// 错误码，0 表示无错误（见 core::error 中的错误码定义）
    pub error: i32,
    /// 最近一次成功处理的时间戳
    pub timestamp: i64,
}

/// 状态回调，在每次状态变更时同步调用
///
/// 回调在状态锁内执行，必须保持非阻塞（典型用法是往 channel 发一份快照）
pub type StateHandler = Box<dyn Fn(&State) + Send + 'static>;

/// 工作线程的内部控制块，由状态互斥锁保护
///
/// 工作体和 seek 等需要与循环体串行化的外部操作都通过它修改状态
pub struct Control {
    state: State,
    terminate: bool,
    handler: Option<StateHandler>,
}

impl Control {
    /// 读取当前状态快照
    pub fn state(&self) -> State {
        self.state
    }

    /// 置为运行：清空错误、重置时间戳
    pub fn set_start(&mut self) {
        self.state.running = true;
        self.state.error = 0;
        self.state.timestamp = 0;
        self.notify_handler();
    }

    /// 置为停止：重置时间戳，可携带错误码
    pub fn set_stop(&mut self, error: i32) {
        self.state.running = false;
        self.state.timestamp = 0;
        self.state.error = error;
        self.notify_handler();
    }

    /// 置为暂停：保留时间戳，可携带错误码
    pub fn set_pause(&mut self, error: i32) {
        self.state.running = false;
        self.state.error = error;
        self.notify_handler();
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.state.timestamp = timestamp;
    }

    fn notify_handler(&self) {
        if let Some(handler) = &self.handler {
            handler(&self.state);
        }
    }
}

/// 工作线程每次迭代执行的工作体
///
/// 工作体在状态锁内执行，外部 stop/pause 只会在迭代间隙生效；
/// 体内可能阻塞的等待（队列、设备、网络）由对应层的 flush/close 解除
pub trait WorkerBody: Send + 'static {
    fn execute(&mut self, ctl: &mut Control);
}

struct Shared {
    ctl: Mutex<Control>,
    cond: Condvar,
}

/// 可暂停/停止/销毁的通用后台工作线程
///
/// 等待谓词为 `running || terminate`，销毁时设置 terminate 并 join
pub struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// 创建线程并进入等待循环（初始为非运行状态）
    pub fn spawn<B: WorkerBody>(mut body: B) -> Self {
        let shared = Arc::new(Shared {
            ctl: Mutex::new(Control {
                state: State::default(),
                terminate: false,
                handler: None,
            }),
            cond: Condvar::new(),
        });

        let loop_shared = shared.clone();
        let thread = thread::spawn(move || loop {
            let mut ctl = loop_shared.ctl.lock();
            while !(ctl.state.running || ctl.terminate) {
                loop_shared.cond.wait(&mut ctl);
            }
            if ctl.terminate {
                break;
            }
            body.execute(&mut ctl);
            // 解锁发生在 guard 作用域结束，给 stop/pause/seek 一个间隙
        });

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// 开始运行工作体，替换状态回调
    pub fn start(&self, handler: Option<StateHandler>) {
        {
            let mut ctl = self.shared.ctl.lock();
            ctl.handler = handler;
            ctl.set_start();
        }
        self.shared.cond.notify_one();
    }

    /// 停止运行并重置时间戳
    pub fn stop(&self) {
        self.shared.ctl.lock().set_stop(0);
    }

    /// 停止运行但保留时间戳
    pub fn pause(&self) {
        self.shared.ctl.lock().set_pause(0);
    }

    pub fn state(&self) -> State {
        self.shared.ctl.lock().state
    }

    /// 锁定控制块，与循环体串行化（供 seek 等组件内部操作使用）
    pub(crate) fn control(&self) -> MutexGuard<'_, Control> {
        self.shared.ctl.lock()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        {
            let mut ctl = self.shared.ctl.lock();
            ctl.terminate = true;
        }
        self.shared.cond.notify_one();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// 每次迭代递增计数并自行暂停，时间戳记录迭代次数
    struct CountBody {
        count: Arc<AtomicU64>,
    }

    impl WorkerBody for CountBody {
        fn execute(&mut self, ctl: &mut Control) {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            ctl.set_timestamp(n as i64);
            if n >= 3 {
                ctl.set_pause(0);
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let count = Arc::new(AtomicU64::new(0));
        let worker = Worker::spawn(CountBody {
            count: count.clone(),
        });
        assert_eq!(worker.state(), State::default());
        // 未 start 时不执行工作体
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pause_keeps_timestamp_stop_resets() {
        let count = Arc::new(AtomicU64::new(0));
        let worker = Worker::spawn(CountBody {
            count: count.clone(),
        });

        worker.start(None);
        // 工作体跑满 3 次后自行暂停
        while worker.state().running {
            std::thread::sleep(Duration::from_millis(1));
        }
        let state = worker.state();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(state.timestamp, 3);

        worker.stop();
        assert_eq!(worker.state().timestamp, 0);
    }

    #[test]
    fn test_handler_invoked_on_transitions() {
        let (tx, rx) = crossbeam_channel::unbounded::<State>();
        let worker = Worker::spawn(CountBody {
            count: Arc::new(AtomicU64::new(2)),
        });

        worker.start(Some(Box::new(move |s| {
            let _ = tx.send(*s);
        })));
        // start 回调
        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(first.running);
        assert_eq!(first.error, 0);
        // 工作体第一次迭代即达到阈值并自行暂停
        let paused = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!paused.running);
        assert_eq!(paused.timestamp, 3);
    }

    #[test]
    fn test_restart_clears_error() {
        struct FailBody;
        impl WorkerBody for FailBody {
            fn execute(&mut self, ctl: &mut Control) {
                ctl.set_pause(-42);
            }
        }

        let worker = Worker::spawn(FailBody);
        worker.start(None);
        while worker.state().running {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.state().error, -42);

        // 重新 start 时回调观察到的第一份状态必须已清空错误
        let (tx, rx) = crossbeam_channel::unbounded::<State>();
        worker.start(Some(Box::new(move |s| {
            let _ = tx.send(*s);
        })));
        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(first.running);
        assert_eq!(first.error, 0);
    }
}
