// 核心数据结构和并发原语

pub mod error;
pub mod queue;
pub mod types;
pub mod worker;

// 重新导出常用类型
pub use error::{PipelineError, Result};
pub use queue::DbQueue;
pub use types::{AudioPacket, PcmFrame, StreamSpec};
pub use worker::{State, StateHandler, Worker, WorkerBody};

pub use error::*;
