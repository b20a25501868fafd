use log::debug;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::Duration;

/// 简单的 TCP 收发封装
///
/// connect/accept/close 之间互斥，recv/send 之间互斥；
/// close 会 shutdown 底层套接字，令阻塞中的 recv/send 失败返回。
/// 定长协议语义：recv/send 要么完成整个长度要么失败，
/// 对端在 size > 0 时提前 EOF 视为失败，EINTR 透明重试。
pub struct TcpLink {
    sck: Mutex<Option<TcpStream>>,
    msg: Mutex<()>,
}

impl TcpLink {
    pub fn new() -> Self {
        Self {
            sck: Mutex::new(None),
            msg: Mutex::new(()),
        }
    }

    /// 作为客户端建立连接，关闭任何已有连接
    pub fn connect(&self, addr: &str, port: u16) -> bool {
        let mut sck = self.sck.lock();
        Self::shutdown_stream(sck.take());
        match TcpStream::connect((addr, port)) {
            Ok(stream) => {
                *sck = Some(stream);
                true
            }
            Err(e) => {
                debug!("连接 {}:{} 失败: {}", addr, port, e);
                false
            }
        }
    }

    /// 作为服务端监听并接受第一个连接，关闭任何已有连接
    pub fn accept(&self, port: u16) -> bool {
        let mut sck = self.sck.lock();
        Self::shutdown_stream(sck.take());
        let listener = match TcpListener::bind(("0.0.0.0", port)) {
            Ok(l) => l,
            Err(e) => {
                debug!("监听端口 {} 失败: {}", port, e);
                return false;
            }
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("已接受连接: {}", peer);
                *sck = Some(stream);
                true
            }
            Err(e) => {
                debug!("接受连接失败: {}", e);
                false
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.sck.lock().is_some()
    }

    /// 阻塞接收恰好 buf.len() 字节
    pub fn recv(&self, buf: &mut [u8]) -> bool {
        let _io = self.msg.lock();
        let Some(stream) = self.stream_handle() else {
            return false;
        };
        if stream.set_read_timeout(None).is_err() {
            return false;
        }
        Self::recv_all(&stream, buf)
    }

    /// 带毫秒超时的接收，数据未在时限内到达返回 false
    pub fn recv_poll(&self, buf: &mut [u8], timeout_ms: u64) -> bool {
        let _io = self.msg.lock();
        let Some(stream) = self.stream_handle() else {
            return false;
        };
        if stream
            .set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))
            .is_err()
        {
            return false;
        }
        Self::recv_all(&stream, buf)
    }

    /// 阻塞发送恰好 buf.len() 字节
    pub fn send(&self, buf: &[u8]) -> bool {
        let _io = self.msg.lock();
        let Some(stream) = self.stream_handle() else {
            return false;
        };
        if stream.set_write_timeout(None).is_err() {
            return false;
        }
        Self::send_all(&stream, buf)
    }

    /// 带毫秒超时的发送
    pub fn send_poll(&self, buf: &[u8], timeout_ms: u64) -> bool {
        let _io = self.msg.lock();
        let Some(stream) = self.stream_handle() else {
            return false;
        };
        if stream
            .set_write_timeout(Some(Duration::from_millis(timeout_ms.max(1))))
            .is_err()
        {
            return false;
        }
        Self::send_all(&stream, buf)
    }

    /// 关闭连接，解除任何阻塞中的收发
    pub fn close(&self) {
        let mut sck = self.sck.lock();
        Self::shutdown_stream(sck.take());
    }

    /// 取一份套接字句柄供收发使用，不长期占用连接锁
    ///
    /// shutdown 作用于底层套接字，对克隆出的句柄同样生效
    fn stream_handle(&self) -> Option<TcpStream> {
        self.sck.lock().as_ref().and_then(|s| s.try_clone().ok())
    }

    fn shutdown_stream(stream: Option<TcpStream>) {
        if let Some(s) = stream {
            let _ = s.shutdown(Shutdown::Both);
        }
    }

    fn recv_all(mut stream: &TcpStream, buf: &mut [u8]) -> bool {
        let mut pos = 0;
        while pos < buf.len() {
            match stream.read(&mut buf[pos..]) {
                // size > 0 时对端 EOF 视为失败
                Ok(0) => return false,
                Ok(n) => pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
        true
    }

    fn send_all(mut stream: &TcpStream, buf: &[u8]) -> bool {
        let mut pos = 0;
        while pos < buf.len() {
            match stream.write(&buf[pos..]) {
                Ok(0) => return false,
                Ok(n) => pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
        true
    }
}

impl Default for TcpLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}
