use crate::core::error::{av_error_code, EPCM_CODECINVAL, EPCM_FORMATINVAL};
use crate::core::worker::Control;
use crate::core::{AudioPacket, State, StateHandler, Worker, WorkerBody};
use crate::player::context::Context;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{ffi, Rescale};
use log::debug;
use std::os::raw::c_int;
use std::sync::Arc;

/// seek 目标：绝对时间（AV_TIME_BASE 微秒单位）或总时长百分比
enum SeekTarget {
    Pts(i64),
    Pct(f64),
}

/// 从解封装器读包进包队列的工作线程，并实现 seek 协议
pub struct Reader {
    worker: Worker,
    ctxt: Arc<Context>,
}

impl Reader {
    pub fn new(ctxt: Arc<Context>) -> Self {
        Self {
            worker: Worker::spawn(ReaderBody { ctxt: ctxt.clone() }),
            ctxt,
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

    /// 跳转到绝对时间（AV_TIME_BASE 微秒单位），内部换算为流时间基
    pub fn seek_pts(&self, pos_pts: i64) -> bool {
        let mut ctl = self.worker.control();
        self.seek_locked(&mut ctl, SeekTarget::Pts(pos_pts))
    }

    /// 跳转到总时长的百分比位置
    pub fn seek_pct(&self, pos_pct: f64) -> bool {
        let mut ctl = self.worker.control();
        self.seek_locked(&mut ctl, SeekTarget::Pct(pos_pct))
    }

    /// seek 协议本体，调用前必须持有本 worker 的状态锁
    ///
    /// 顺序：换算并裁剪目标 → 解封装器 seek → 清包队列 →
    /// 清解码器缓冲 → 清帧队列。成功返回后下游不会再看到 seek 前的数据。
    fn seek_locked(&self, ctl: &mut Control, target: SeekTarget) -> bool {
        let Some(mut fmt) = self.ctxt.lock_format() else {
            ctl.set_stop(EPCM_FORMATINVAL);
            return false;
        };
        let stream_index = fmt.stream_index;
        let Some((timebase, duration)) = fmt.stream_info() else {
            drop(fmt);
            ctl.set_stop(EPCM_FORMATINVAL);
            return false;
        };

        let conv_pts = match target {
            SeekTarget::Pts(pts) => pts.rescale(ffmpeg::rescale::TIME_BASE, timebase),
            SeekTarget::Pct(pct) => (pct * duration as f64) as i64,
        };
        let clip_pts = conv_pts.clamp(0, duration);
        // 往回跳需要 BACKWARD 标志，落到目标之前最近的关键帧
        let flags = if clip_pts < ctl.state().timestamp {
            ffi::AVSEEK_FLAG_BACKWARD as c_int
        } else {
            0
        };
        debug!("⏩ seek 到 pts {} (flags {})", clip_pts, flags);
        let rv = unsafe {
            ffi::av_seek_frame(fmt.input.as_mut_ptr(), stream_index as c_int, clip_pts, flags)
        };
        self.ctxt.packet_queue().flush();
        drop(fmt);

        if rv < 0 {
            ctl.set_pause(rv);
            return false;
        }
        let Some(mut dec) = self.ctxt.lock_decoder() else {
            ctl.set_stop(EPCM_CODECINVAL);
            return false;
        };
        dec.flush();
        self.ctxt.frame_queue().flush();
        true
    }
}

struct ReaderBody {
    ctxt: Arc<Context>,
}

impl WorkerBody for ReaderBody {
    /// 每次迭代读出一个属于目标流的包并入队
    ///
    /// 其它流的包原地丢弃；EOF 时停止并向下游转发空哨兵；
    /// 入队因 flush 失败时丢包继续，不算错误
    fn execute(&mut self, ctl: &mut Control) {
        let Some(mut fmt) = self.ctxt.lock_format() else {
            ctl.set_stop(EPCM_FORMATINVAL);
            return;
        };
        let stream_index = fmt.stream_index;

        let mut packet = ffmpeg::Packet::empty();
        let rv = loop {
            match packet.read(&mut fmt.input) {
                Ok(()) => {
                    if packet.stream() == stream_index {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        drop(fmt);

        match rv {
            Ok(()) => {
                let pts = packet.pts().unwrap_or(0);
                let duration = packet.duration();
                if self
                    .ctxt
                    .packet_queue()
                    .push(Some(AudioPacket(packet)))
                    .is_ok()
                {
                    ctl.set_timestamp(pts + duration);
                }
            }
            Err(ffmpeg::Error::Eof) => {
                // EOF：停止并转发哨兵（重试直到下游接收）
                ctl.set_stop(0);
                while self.ctxt.packet_queue().push(None).is_err() {}
            }
            Err(e) => ctl.set_pause(av_error_code(&e)),
        }
    }
}
