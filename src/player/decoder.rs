use crate::core::error::{av_error_code, EPCM_CODECINVAL};
use crate::core::worker::Control;
use crate::core::{PcmFrame, State, StateHandler, Worker, WorkerBody};
use crate::player::context::Context;
use ffmpeg_next as ffmpeg;
use std::sync::Arc;

/// 从包队列取包解码、向帧队列送帧的工作线程
pub struct Decoder {
    worker: Worker,
}

impl Decoder {
    pub fn new(ctxt: Arc<Context>) -> Self {
        Self {
            worker: Worker::spawn(DecoderBody { ctxt }),
        }
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
}

struct DecoderBody {
    ctxt: Arc<Context>,
}

impl WorkerBody for DecoderBody {
    /// 每次迭代消费一个包，可能产出多帧
    fn execute(&mut self, ctl: &mut Control) {
        // 取包在解码器锁之外进行，seek 清空包队列时不会与本体死锁
        let packet = match self.ctxt.packet_queue().pop() {
            // 队列被 flush，不是错误
            None => return,
            Some(None) => {
                // EOS：停止并向帧队列转发空哨兵（重试直到下游接收）
                ctl.set_stop(0);
                while self.ctxt.frame_queue().push(None).is_err() {}
                return;
            }
            Some(Some(packet)) => packet,
        };

        let Some(mut dec) = self.ctxt.lock_decoder() else {
            ctl.set_stop(EPCM_CODECINVAL);
            return;
        };

        match dec.send_packet(&packet.0) {
            Ok(()) => {}
            // 解码器暂不接收输入时先排空输出再说
            Err(ffmpeg::Error::Other { errno: 11 }) => {}
            Err(e) => {
                drop(dec);
                ctl.set_pause(av_error_code(&e));
                return;
            }
        }

        loop {
            let mut frame = ffmpeg::frame::Audio::empty();
            match dec.receive_frame(&mut frame) {
                Ok(()) => {
                    let pts = frame.pts().unwrap_or(0);
                    // 入队因 flush 失败时丢帧继续，不算错误
                    if self.ctxt.frame_queue().push(Some(PcmFrame(frame))).is_ok() {
                        ctl.set_timestamp(pts);
                    }
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN，需要更多输入
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    drop(dec);
                    ctl.set_pause(av_error_code(&e));
                    return;
                }
            }
        }
    }
}
