// 流水线核心模块：上下文 + 三个工作线程

pub mod context;
pub mod decoder;
pub mod device_sink;
pub mod file_sink;
pub mod reader;
pub mod transform;

pub use context::Context;
pub use decoder::Decoder;
pub use device_sink::DeviceSink;
pub use file_sink::{FileSink, OutputMode};
pub use reader::Reader;
pub use transform::Transform;
