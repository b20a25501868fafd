use crate::core::error::{ENET_CONNFAIL, ENET_TXFAIL};
use crate::core::worker::Control;
use crate::core::{State, StateHandler, Worker, WorkerBody};
use crate::net::tcp::TcpLink;
use log::info;
use parking_lot::{Condvar, Mutex};
use std::io::SeekFrom;
use std::sync::Arc;

/// 默认网络传输块大小（字节）
pub const DEF_BLOCK_SIZE: u64 = 1024;

/// 接收缓冲：文件内容 + 已接收进度，关闭后整体置空
struct RamData {
    buf: Vec<u8>,
    filesz: u64,
    recv_pos: u64,
}

struct RamShared {
    conn: TcpLink,
    blocksz: u64,
    /// 当前读位置，同时串行化并发的 read/seek
    read_pos: Mutex<u64>,
    data: Mutex<Option<RamData>>,
    /// 接收进度推进与关闭事件的通知
    cond: Condvar,
}

/// 通过 TCP 在后台预取到内存的可随机读文件
///
/// 握手：建立连接后收 8 字节小端文件大小并分配缓冲；
/// start 后后台线程按块接收文件内容。read/seek 会阻塞等待
/// 所需数据到达；close 关闭连接，解除后台接收与所有等待者的阻塞。
/// 不变量：0 ≤ read_pos ≤ recv_pos ≤ filesz。
pub struct RamFile {
    worker: Worker,
    shared: Arc<RamShared>,
}

impl RamFile {
    pub fn new(blocksz: u64) -> Self {
        let shared = Arc::new(RamShared {
            conn: TcpLink::new(),
            blocksz: blocksz.max(1),
            read_pos: Mutex::new(0),
            data: Mutex::new(None),
            cond: Condvar::new(),
        });
        Self {
            worker: Worker::spawn(RamBody {
                shared: shared.clone(),
                scratch: Vec::new(),
            }),
            shared,
        }
    }

    /// 作为客户端连接远端并完成握手
    pub fn open(&self, addr: &str, port: u16) -> bool {
        // 先关旧连接打断可能阻塞在 recv 的后台体，才能与其串行化
        self.shared.conn.close();
        let mut ctl = self.worker.control();
        let mut read_pos = self.shared.read_pos.lock();
        *self.shared.data.lock() = None;
        if !self.shared.conn.connect(addr, port) {
            ctl.set_stop(ENET_CONNFAIL);
            return false;
        }
        self.handshake(&mut ctl, &mut read_pos)
    }

    /// 作为服务端接受连接并完成握手
    pub fn open_accept(&self, port: u16) -> bool {
        self.shared.conn.close();
        let mut ctl = self.worker.control();
        let mut read_pos = self.shared.read_pos.lock();
        *self.shared.data.lock() = None;
        if !self.shared.conn.accept(port) {
            ctl.set_stop(ENET_CONNFAIL);
            return false;
        }
        self.handshake(&mut ctl, &mut read_pos)
    }

    /// 收 8 字节小端文件大小并分配接收缓冲，调用方持有读锁
    fn handshake(&self, ctl: &mut Control, read_pos: &mut u64) -> bool {
        let mut szbuf = [0u8; 8];
        if !self.shared.conn.recv(&mut szbuf) {
            self.shared.conn.close();
            ctl.set_stop(ENET_TXFAIL);
            return false;
        }
        let filesz = u64::from_le_bytes(szbuf);
        info!("📥 RAM 文件握手完成，大小 {} 字节", filesz);
        *read_pos = 0;
        *self.shared.data.lock() = Some(RamData {
            buf: vec![0u8; filesz as usize],
            filesz,
            recv_pos: 0,
        });
        true
    }

    /// 从当前读位置拷贝最多 buf.len() 字节，必要时阻塞等待接收
    ///
    /// 返回实际读出的字节数；文件尾或连接已关闭返回 0
    pub fn read(&self, buf: &mut [u8]) -> u64 {
        let mut read_pos = self.shared.read_pos.lock();
        let mut data = self.shared.data.lock();

        let size = match data.as_ref() {
            None => return 0,
            Some(d) => (d.filesz - *read_pos).min(buf.len() as u64),
        };
        if size == 0 {
            return 0;
        }
        loop {
            let Some(d) = data.as_ref() else {
                // 等待期间连接被关闭
                return 0;
            };
            if d.recv_pos - *read_pos >= size {
                let start = *read_pos as usize;
                buf[..size as usize].copy_from_slice(&d.buf[start..start + size as usize]);
                *read_pos += size;
                return size;
            }
            self.shared.cond.wait(&mut data);
        }
    }

    /// 移动读位置，目标超出已接收范围时阻塞等待
    ///
    /// 越界（负向下溢、超过文件尾）返回 false；seek 到文件尾本身合法
    pub fn seek(&self, pos: SeekFrom) -> bool {
        let mut read_pos = self.shared.read_pos.lock();
        let mut data = self.shared.data.lock();
        let filesz = match data.as_ref() {
            None => return false,
            Some(d) => d.filesz,
        };
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => Self::apply_offset(*read_pos, offset),
            SeekFrom::End(offset) => Self::apply_offset(filesz, offset),
        };
        let target = match target {
            Some(t) if t <= filesz => t,
            _ => return false,
        };
        loop {
            let Some(d) = data.as_ref() else {
                return false;
            };
            if d.recv_pos >= target {
                break;
            }
            self.shared.cond.wait(&mut data);
        }
        *read_pos = target;
        true
    }

    /// 关闭连接并释放缓冲，解除后台接收与所有 read/seek 等待者
    pub fn close(&self) {
        self.shared.conn.close();
        {
            let mut data = self.shared.data.lock();
            *data = None;
        }
        self.shared.cond.notify_all();
        self.worker.stop();
    }

    pub fn blocksize(&self) -> u64 {
        self.shared.blocksz
    }

    /// 文件大小，未打开时为 0
    pub fn filesize(&self) -> u64 {
        self.shared.data.lock().as_ref().map_or(0, |d| d.filesz)
    }

    pub fn start(&self, handler: Option<StateHandler>) {
        self.worker.start(handler);
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn pause(&self) {
        self.worker.pause();
    }

    pub fn state(&self) -> State {
        self.worker.state()
    }

    fn apply_offset(base: u64, offset: i64) -> Option<u64> {
        if offset < 0 {
            base.checked_sub(offset.unsigned_abs())
        } else {
            base.checked_add(offset as u64)
        }
    }
}

impl Default for RamFile {
    fn default() -> Self {
        Self::new(DEF_BLOCK_SIZE)
    }
}

impl Drop for RamFile {
    fn drop(&mut self) {
        self.close();
    }
}

struct RamBody {
    shared: Arc<RamShared>,
    scratch: Vec<u8>,
}

impl WorkerBody for RamBody {
    /// 每次迭代接收至多一个块并推进 recv_pos
    ///
    /// 网络接收不持任何锁，close 通过关闭连接解除阻塞；
    /// 传输失败暂停但不关闭连接，便于诊断后恢复
    fn execute(&mut self, ctl: &mut Control) {
        let (offset, size) = {
            let data = self.shared.data.lock();
            match data.as_ref() {
                None => {
                    ctl.set_stop(0);
                    return;
                }
                Some(d) => {
                    let size = (d.filesz - d.recv_pos).min(self.shared.blocksz);
                    if size == 0 {
                        // 整个文件接收完毕
                        ctl.set_stop(0);
                        return;
                    }
                    (d.recv_pos, size)
                }
            }
        };

        self.scratch.resize(size as usize, 0);
        if self.shared.conn.recv(&mut self.scratch) {
            {
                let mut data = self.shared.data.lock();
                if let Some(d) = data.as_mut() {
                    let start = offset as usize;
                    d.buf[start..start + size as usize].copy_from_slice(&self.scratch);
                    d.recv_pos = offset + size;
                }
            }
            self.shared.cond.notify_all();
        } else {
            ctl.set_pause(ENET_TXFAIL);
        }
    }
}
