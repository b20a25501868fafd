// 网络源模块：TCP 收发原语与内存预取文件

pub mod ramfile;
pub mod tcp;

pub use ramfile::RamFile;
pub use tcp::TcpLink;
