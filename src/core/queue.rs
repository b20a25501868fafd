use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

struct Side<T> {
    buf: VecDeque<T>,
    flush: bool,
    num_wait: usize,
}

impl<T> Side<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            flush: false,
            num_wait: 0,
        }
    }
}

/// 双缓冲阻塞队列
///
/// 生产者与消费者各持一个容量为 C 的缓冲和独立的互斥锁/条件变量，
/// 互不竞争；弹出侧空时短暂同时持有两把锁交换缓冲。在途元素上限 2C。
///
/// flush 丢弃两侧驻留元素（Drop 即释放），并使等待中的 push/pop 返回失败；
/// flush 标志在无等待者后由最后一个观察到它的调用自动复位，队列可复用。
pub struct DbQueue<T> {
    capacity: usize,
    pop_side: Mutex<Side<T>>,
    pop_cond: Condvar,
    push_side: Mutex<Side<T>>,
    push_cond: Condvar,
}

impl<T> DbQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pop_side: Mutex::new(Side::new(capacity)),
            pop_cond: Condvar::new(),
            push_side: Mutex::new(Side::new(capacity)),
            push_cond: Condvar::new(),
        }
    }

    /// 入队，满时阻塞
    ///
    /// 队列正在 flush（或等待期间被 flush）时返回 `Err` 并交还元素
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut side = self.push_side.lock();
        while !side.flush && side.buf.len() == self.capacity {
            side.num_wait += 1;
            self.push_cond.wait(&mut side);
            side.num_wait -= 1;
        }
        let rv = if side.flush {
            side.flush = side.num_wait != 0;
            Err(item)
        } else {
            side.buf.push_back(item);
            Ok(())
        };
        drop(side);
        self.pop_cond.notify_all();
        rv
    }

    /// 入队，满时最多阻塞 `timeout`
    ///
    /// 超时或被 flush 均返回 `Err` 交还元素，元素所有权不会丢失
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let mut side = self.push_side.lock();
        while !side.flush && side.buf.len() == self.capacity {
            side.num_wait += 1;
            let timed_out = self.push_cond.wait_for(&mut side, timeout).timed_out();
            side.num_wait -= 1;
            if timed_out {
                return Err(item);
            }
        }
        let rv = if side.flush {
            side.flush = side.num_wait != 0;
            Err(item)
        } else {
            side.buf.push_back(item);
            Ok(())
        };
        drop(side);
        self.pop_cond.notify_all();
        rv
    }

    /// 出队，空时阻塞
    ///
    /// 队列正在 flush（或等待期间被 flush）时返回 `None`
    pub fn pop(&self) -> Option<T> {
        let mut side = self.pop_side.lock();
        while !side.flush && side.buf.is_empty() {
            let refilled = {
                let mut push = self.push_side.lock();
                Self::refill(&mut side, &mut push)
            };
            if refilled {
                self.push_cond.notify_all();
            } else {
                side.num_wait += 1;
                self.pop_cond.wait(&mut side);
                side.num_wait -= 1;
            }
        }
        if side.flush {
            side.flush = side.num_wait != 0;
            None
        } else {
            side.buf.pop_front()
        }
    }

    /// 出队，空时最多阻塞 `timeout`，超时或被 flush 返回 `None`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut side = self.pop_side.lock();
        while !side.flush && side.buf.is_empty() {
            let refilled = {
                let mut push = self.push_side.lock();
                Self::refill(&mut side, &mut push)
            };
            if refilled {
                self.push_cond.notify_all();
            } else {
                side.num_wait += 1;
                let timed_out = self.pop_cond.wait_for(&mut side, timeout).timed_out();
                side.num_wait -= 1;
                if timed_out {
                    return None;
                }
            }
        }
        if side.flush {
            side.flush = side.num_wait != 0;
            None
        } else {
            side.buf.pop_front()
        }
    }

    /// 清空队列并唤醒所有等待者，驻留元素逐个 drop 释放
    pub fn flush(&self) {
        self.flush_with(drop);
    }

    /// 清空队列，驻留元素逐个交给 `dispose` 处置（每个元素恰好一次）
    pub fn flush_with<F: FnMut(T)>(&self, mut dispose: F) {
        {
            let mut side = self.pop_side.lock();
            side.flush = true;
            for item in side.buf.drain(..) {
                dispose(item);
            }
        }
        self.pop_cond.notify_all();
        {
            let mut side = self.push_side.lock();
            side.flush = true;
            for item in side.buf.drain(..) {
                dispose(item);
            }
        }
        self.push_cond.notify_all();
    }

    /// 当前元素总数，需要同时持有两把锁
    pub fn size(&self) -> usize {
        // 锁序固定：pop 先于 push
        let pop = self.pop_side.lock();
        let push = self.push_side.lock();
        pop.buf.len() + push.buf.len()
    }

    /// 单侧缓冲容量（在途上限为 2 倍）
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 弹出侧空时从压入侧整体交换数据，调用方需同时持有两把锁
    fn refill(pop: &mut Side<T>, push: &mut Side<T>) -> bool {
        if push.buf.is_empty() {
            return false;
        }
        std::mem::swap(&mut pop.buf, &mut push.buf);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = DbQueue::new(4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    fn test_pop_timeout_zero_on_empty() {
        let q: DbQueue<u8> = DbQueue::new(4);
        assert_eq!(q.pop_timeout(Duration::ZERO), None);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_push_timeout_zero_on_full_returns_item() {
        let q = DbQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        // 压入缓冲已满，立即超时并交还元素
        assert_eq!(q.push_timeout(3, Duration::ZERO), Err(3));
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn test_effective_capacity_2c() {
        let q = DbQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        // 弹出触发交换，压入侧腾空
        assert_eq!(q.pop(), Some(1));
        q.push(3).unwrap();
        q.push(4).unwrap();
        // 两侧各一个满缓冲的情况：1 个在弹出侧 + 2 个在压入侧
        assert_eq!(q.size(), 3);
        assert!(q.size() <= 2 * q.capacity());
        assert_eq!(q.push_timeout(5, Duration::ZERO), Err(5));
    }

    #[test]
    fn test_flush_disposes_resident_exactly_once() {
        let q = DbQueue::new(8);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        // 已交付给消费者的元素不经过处置器
        assert_eq!(q.pop(), Some(0));

        let mut disposed = Vec::new();
        q.flush_with(|v| disposed.push(v));
        disposed.sort();
        assert_eq!(disposed, vec![1, 2, 3, 4]);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_flush_unblocks_waiting_consumer() {
        let q: Arc<DbQueue<u8>> = Arc::new(DbQueue::new(2));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.flush();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_flush_unblocks_waiting_producer() {
        let q: Arc<DbQueue<u8>> = Arc::new(DbQueue::new(1));
        q.push(1).unwrap();
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(2));
        thread::sleep(Duration::from_millis(50));
        q.flush();
        // 等待中的生产者拿回元素
        assert_eq!(handle.join().unwrap(), Err(2));
    }

    #[test]
    fn test_reusable_after_flush() {
        let q = DbQueue::new(2);
        q.push(1).unwrap();
        q.flush();
        // flush 后第一次调用观察到标志并复位
        assert_eq!(q.push(2), Err(2));
        assert_eq!(q.pop_timeout(Duration::ZERO), None);
        // 标志已复位，恢复正常收发
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_pop_timeout_returns_item_when_available() {
        let q: Arc<DbQueue<u8>> = Arc::new(DbQueue::new(2));
        let q2 = q.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            q2.push(7).unwrap();
        });
        assert_eq!(q.pop_timeout(Duration::from_secs(5)), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn test_push_timeout_succeeds_when_space_frees() {
        let q: Arc<DbQueue<u8>> = Arc::new(DbQueue::new(1));
        q.push(1).unwrap();
        let q2 = q.clone();
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            q2.pop()
        });
        assert!(q.push_timeout(2, Duration::from_secs(5)).is_ok());
        assert_eq!(consumer.join().unwrap(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn test_size_never_exceeds_2c_under_contention() {
        let q: Arc<DbQueue<usize>> = Arc::new(DbQueue::new(8));
        let q2 = q.clone();
        let producer = thread::spawn(move || {
            for i in 0..500 {
                q2.push(i).unwrap();
            }
        });
        let q3 = q.clone();
        let sampler = thread::spawn(move || {
            for _ in 0..200 {
                assert!(q3.size() <= 2 * q3.capacity());
                thread::sleep(Duration::from_micros(50));
            }
        });
        let mut received = 0;
        while received < 500 {
            if q.pop_timeout(Duration::from_secs(5)).is_some() {
                received += 1;
            }
        }
        producer.join().unwrap();
        sampler.join().unwrap();
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_threaded_transfer() {
        let q: Arc<DbQueue<usize>> = Arc::new(DbQueue::new(16));
        let q2 = q.clone();
        let producer = thread::spawn(move || {
            for i in 0..1000 {
                q2.push(i).unwrap();
            }
        });
        let mut got = Vec::with_capacity(1000);
        for _ in 0..1000 {
            got.push(q.pop().unwrap());
        }
        producer.join().unwrap();
        // 单生产者单消费者下保序
        assert!(got.windows(2).all(|w| w[0] < w[1]));
    }
}
