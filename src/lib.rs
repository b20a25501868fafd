// pcmflow：并发音频流水线
//
// 数据流：输入源 → 解封装 → 包队列 → 解码 → 帧队列 → 输出端
// Reader / Decoder / Sink 三个工作线程并行，通过共享上下文协作

pub mod core;
pub mod net;
pub mod player;
