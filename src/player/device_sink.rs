use crate::core::error::{EPCM_CODECINVAL, EPCM_FORMATINVAL};
use crate::core::worker::Control;
use crate::core::{State, StateHandler, StreamSpec, Worker, WorkerBody};
use crate::player::context::Context;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use ffmpeg_next::util::format::sample::Sample;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// 默认关闭设备侧重采样
pub const DEF_RESAMPLE: bool = false;
/// 默认播放延迟（微秒）
pub const DEF_LATENCY_US: u32 = 500_000;

/// 流规格到 ALSA 采样格式的映射
///
/// 特例：S32 容器且有效位数 24 时按设备的 S24 协商，由设备处理填充；
/// 其余子采样格式不支持
fn map_format(spec: &StreamSpec) -> Option<Format> {
    let format = match spec.format {
        Sample::U8(_) => Format::U8,
        Sample::I16(_) => Format::s16(),
        Sample::I32(_) if spec.bitdepth == 24 => Format::s24(),
        Sample::I32(_) => Format::s32(),
        Sample::F32(_) => Format::float(),
        Sample::F64(_) => Format::float64(),
        _ => return None,
    };
    if spec.is_subsample() && format != Format::s24() {
        // 24-in-32 之外的子采样不支持
        return None;
    }
    Some(format)
}

/// 按流规格协商设备参数
fn configure_dev(
    pcm: &PCM,
    format: Format,
    spec: &StreamSpec,
    resample: bool,
    latency_us: u32,
) -> alsa::Result<()> {
    let hwp = HwParams::any(pcm)?;
    hwp.set_rate_resample(resample)?;
    hwp.set_access(Access::RWInterleaved)?;
    hwp.set_format(format)?;
    hwp.set_channels(spec.channels as u32)?;
    hwp.set_rate(spec.rate, ValueOr::Nearest)?;
    hwp.set_buffer_time_near(latency_us, ValueOr::Nearest)?;
    pcm.hw_params(&hwp)?;
    Ok(())
}

/// 设备写入策略，configure 时选定一次
///
/// 绑定只提供交错写入，planar 帧先在暂存区按整容器交错，
/// 暂存区在 configure 时按声道数分配一次
struct DevWriter {
    spec: StreamSpec,
    scratch: Vec<u8>,
}

impl DevWriter {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            scratch: Vec::new(),
        }
    }

    /// 阻塞写完整帧；欠载时调用一次设备恢复原语并重试，
    /// 恢复失败返回该错误码
    fn write(&mut self, pcm: &PCM, frame: &ffmpeg_next::frame::Audio) -> Result<(), i32> {
        let bw = self.spec.bytes_per_sample();
        let channels = self.spec.channels as usize;
        let samples = frame.samples();
        let frame_bytes = bw * channels;

        let data: &[u8] = if self.spec.is_planar() {
            self.scratch.resize(samples * frame_bytes, 0);
            for s in 0..samples {
                for c in 0..channels {
                    let dst = (s * channels + c) * bw;
                    self.scratch[dst..dst + bw]
                        .copy_from_slice(&frame.data(c)[s * bw..(s + 1) * bw]);
                }
            }
            &self.scratch
        } else {
            &frame.data(0)[..samples * frame_bytes]
        };

        let io = pcm.io_bytes();
        let mut written = 0usize;
        while written < samples {
            match io.writei(&data[written * frame_bytes..samples * frame_bytes]) {
                Ok(n) => written += n,
                Err(e) => {
                    let errno = e.errno();
                    if pcm.try_recover(e, true).is_err() {
                        return Err(errno);
                    }
                }
            }
        }
        Ok(())
    }
}

struct DeviceIo {
    pcm: PCM,
    writer: Option<DevWriter>,
}

/// 把帧队列播放到 ALSA 设备的工作线程
///
/// 一个上下文只应挂一个消费帧队列的 sink，帧会被破坏性地取走。
/// 设备应尽量保持打开，换流时用 configure 重新协商参数
pub struct DeviceSink {
    worker: Worker,
    ctxt: Arc<Context>,
    io: Arc<Mutex<Option<DeviceIo>>>,
}

impl DeviceSink {
    pub fn new(ctxt: Arc<Context>) -> Self {
        let io = Arc::new(Mutex::new(None));
        Self {
            worker: Worker::spawn(DeviceSinkBody {
                ctxt: ctxt.clone(),
                io: io.clone(),
            }),
            ctxt,
            io,
        }
    }

    /// 打开播放设备（参数协商留给 configure）
    pub fn open(&self, devname: &str) -> bool {
        let mut ctl = self.worker.control();
        let mut guard = self.io.lock();
        if let Some(io) = guard.take() {
            let _ = io.pcm.drain();
        }
        match PCM::new(devname, Direction::Playback, false) {
            Ok(pcm) => {
                info!("🔊 播放设备已打开: {}", devname);
                *guard = Some(DeviceIo { pcm, writer: None });
                true
            }
            Err(e) => {
                ctl.set_stop(e.errno());
                false
            }
        }
    }

    /// 按上下文当前流规格协商设备参数
    ///
    /// 先排空当前播放再设置参数；规格不变时重复调用是安全的
    pub fn configure(&self, resample: bool, latency_us: u32) -> bool {
        let mut ctl = self.worker.control();
        let mut guard = self.io.lock();
        let Some(io) = guard.as_mut() else {
            return false;
        };
        let Some(spec) = self.ctxt.stream_spec() else {
            ctl.set_stop(EPCM_FORMATINVAL | EPCM_CODECINVAL);
            return false;
        };
        let Some(format) = map_format(&spec) else {
            ctl.set_stop(EPCM_CODECINVAL);
            return false;
        };
        let _ = io.pcm.drain();
        match configure_dev(&io.pcm, format, &spec, resample, latency_us) {
            Ok(()) => {
                io.writer = Some(DevWriter::new(spec));
                true
            }
            Err(e) => {
                io.writer = None;
                ctl.set_stop(e.errno());
                false
            }
        }
    }

    /// 排空并关闭设备
    pub fn close(&self) {
        let mut ctl = self.worker.control();
        let mut error = 0;
        if let Some(io) = self.io.lock().take() {
            if let Err(e) = io.pcm.drain() {
                error = e.errno();
            }
        }
        ctl.set_stop(error);
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

struct DeviceSinkBody {
    ctxt: Arc<Context>,
    io: Arc<Mutex<Option<DeviceIo>>>,
}

impl WorkerBody for DeviceSinkBody {
    /// 每次迭代取一帧阻塞写入设备
    ///
    /// 写失败暂停但不关闭设备，允许恢复后续播放
    fn execute(&mut self, ctl: &mut Control) {
        {
            let guard = self.io.lock();
            match guard.as_ref() {
                Some(io) if io.writer.is_some() => {}
                _ => {
                    ctl.set_stop(0);
                    return;
                }
            }
        }

        let frame = match self.ctxt.frame_queue().pop() {
            // 队列被 flush，不是错误
            None => return,
            Some(None) => {
                // EOS：排空设备后停止
                let mut error = 0;
                if let Some(io) = self.io.lock().as_ref() {
                    if let Err(e) = io.pcm.drain() {
                        error = e.errno();
                    }
                }
                ctl.set_stop(error);
                return;
            }
            Some(Some(frame)) => frame,
        };

        let mut guard = self.io.lock();
        let rv = match guard.as_mut() {
            Some(io) => match io.writer.as_mut() {
                Some(writer) => writer.write(&io.pcm, &frame.0),
                None => {
                    ctl.set_stop(0);
                    return;
                }
            },
            None => {
                ctl.set_stop(0);
                return;
            }
        };
        let pts = frame.0.pts().unwrap_or(0);
        drop(frame);
        match rv {
            // 时间戳只记录成功写入设备的帧
            Ok(()) => ctl.set_timestamp(pts),
            Err(errno) => ctl.set_pause(errno),
        }
    }
}
