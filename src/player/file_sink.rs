use crate::core::error::{io_error_code, EPCM_CODECINVAL, EPCM_FORMATINVAL};
use crate::core::worker::Control;
use crate::core::{State, StateHandler, StreamSpec, Worker, WorkerBody};
use crate::player::context::Context;
use crate::player::transform::Transform;
use ffmpeg_next::Rational;
use ffmpeg_next::Rescale;
use log::info;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// 原始输出侧车元数据文件的后缀
const METADATA_SUFFIX: &str = ".meta";
/// WAV 整数 PCM 格式标签
const WAV_FMT_PCM: u16 = 0x0001;
/// WAV IEEE 浮点格式标签
const WAV_FMT_FLOAT: u16 = 0x0003;

/// 文件输出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// 原始 PCM 字节 + .meta 侧车
    Raw,
    /// RIFF/WAVE 容器
    Wav,
}

/// WAV 头各尺寸字段的核算结果
struct WavLayout {
    fmt_tag: u16,
    fmt_chunk_size: u32,
    block_count: i64,
    block_align: u32,
    data_size: u32,
    riff_size: u32,
    pad: u32,
}

/// 由流规格推导 WAV 头尺寸
///
/// 块数按目标时间基 1/rate（每秒刻度数）换算
fn wav_layout(spec: &StreamSpec) -> WavLayout {
    let block_count = spec
        .duration
        .rescale(spec.timebase, Rational::new(1, spec.rate as i32));
    let block_align = spec.channels as u32 * spec.bytes_per_depth() as u32;
    let data_size = block_count as u32 * block_align;
    let (fmt_tag, fmt_chunk_size) = if spec.is_float() {
        (WAV_FMT_FLOAT, 18u32)
    } else {
        (WAV_FMT_PCM, 16u32)
    };
    let mut riff_size = 4 + 8 + fmt_chunk_size + 8 + data_size;
    if spec.is_float() {
        // fact 块
        riff_size += 8 + 4;
    }
    let pad = riff_size & 1;
    WavLayout {
        fmt_tag,
        fmt_chunk_size,
        block_count,
        block_align,
        data_size,
        riff_size,
        pad,
    }
}

/// 写出完整 RIFF/WAVE 头并预留数据区
///
/// 数据区（含可能的 pad 字节）先填零再把游标拉回数据区开头，
/// 之后的 PCM 写入按流式进行，关闭时无需回填任何尺寸字段
fn write_wav_header<W: Write + Seek>(out: &mut W, spec: &StreamSpec) -> io::Result<()> {
    let l = wav_layout(spec);

    out.write_all(b"RIFF")?;
    out.write_all(&(l.riff_size + l.pad).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    // 块标签为 "fmt "，第四个字节是空格
    out.write_all(b"fmt ")?;
    out.write_all(&l.fmt_chunk_size.to_le_bytes())?;
    out.write_all(&l.fmt_tag.to_le_bytes())?;
    out.write_all(&spec.channels.to_le_bytes())?;
    out.write_all(&spec.rate.to_le_bytes())?;
    out.write_all(&(spec.rate * l.block_align).to_le_bytes())?;
    out.write_all(&(l.block_align as u16).to_le_bytes())?;
    out.write_all(&(spec.bitdepth as u16).to_le_bytes())?;
    if spec.is_float() {
        out.write_all(&0u16.to_le_bytes())?; // cb_size
        out.write_all(b"fact")?;
        out.write_all(&4u32.to_le_bytes())?;
        out.write_all(&(spec.channels as u32 * l.block_count as u32).to_le_bytes())?;
    }

    out.write_all(b"data")?;
    out.write_all(&l.data_size.to_le_bytes())?;

    let reserve = (l.data_size + l.pad) as u64;
    io::copy(&mut io::repeat(0u8).take(reserve), out)?;
    out.seek(SeekFrom::Current(-(reserve as i64)))?;
    Ok(())
}

/// 写出 .meta 侧车并打开数据文件
fn open_file_raw(path: &str, spec: &StreamSpec) -> io::Result<File> {
    let mut meta = File::create(format!("{}{}", path, METADATA_SUFFIX))?;
    writeln!(meta, ".format={}", spec.format_code())?;
    writeln!(meta, ".timebase.num={}", spec.timebase.numerator())?;
    writeln!(meta, ".timebase.den={}", spec.timebase.denominator())?;
    writeln!(meta, ".duration={}", spec.duration)?;
    writeln!(meta, ".bitdepth={}", spec.bitdepth)?;
    writeln!(meta, ".channels={}", spec.channels)?;
    writeln!(meta, ".rate={}", spec.rate)?;
    File::create(path)
}

/// 打开 WAV 文件并写出头
fn open_file_wav(path: &str, spec: &StreamSpec) -> io::Result<File> {
    let mut file = File::create(path)?;
    write_wav_header(&mut file, spec)?;
    Ok(file)
}

struct SinkIo {
    file: File,
    spec: StreamSpec,
    transform: Transform,
}

/// 把帧队列写入文件（raw 或 WAV）的工作线程
///
/// 一个上下文只应挂一个消费帧队列的 sink，帧会被破坏性地取走
pub struct FileSink {
    worker: Worker,
    ctxt: Arc<Context>,
    io: Arc<Mutex<Option<SinkIo>>>,
}

impl FileSink {
    pub fn new(ctxt: Arc<Context>) -> Self {
        let io = Arc::new(Mutex::new(None));
        Self {
            worker: Worker::spawn(FileSinkBody {
                ctxt: ctxt.clone(),
                io: io.clone(),
            }),
            ctxt,
            io,
        }
    }

    /// 按模式打开输出文件，写出侧车/头部并选定搬运策略
    pub fn open(&self, path: &str, mode: OutputMode) -> bool {
        let mut ctl = self.worker.control();
        let mut guard = self.io.lock();
        *guard = None;

        let Some(spec) = self.ctxt.stream_spec() else {
            ctl.set_stop(EPCM_FORMATINVAL | EPCM_CODECINVAL);
            return false;
        };

        let rv = match mode {
            OutputMode::Raw => open_file_raw(path, &spec),
            OutputMode::Wav => open_file_wav(path, &spec),
        };
        match rv {
            Ok(file) => {
                info!("📝 文件输出已打开: {} ({:?})", path, mode);
                *guard = Some(SinkIo {
                    file,
                    spec,
                    transform: Transform::select(&spec),
                });
                true
            }
            Err(e) => {
                ctl.set_stop(io_error_code(&e));
                false
            }
        }
    }

    /// 关闭输出文件
    pub fn close(&self) {
        let _ctl = self.worker.control();
        *self.io.lock() = None;
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

struct FileSinkBody {
    ctxt: Arc<Context>,
    io: Arc<Mutex<Option<SinkIo>>>,
}

impl WorkerBody for FileSinkBody {
    /// 每次迭代取一帧按策略写入文件
    ///
    /// 写失败暂停但不关闭文件，允许恢复后续写
    fn execute(&mut self, ctl: &mut Control) {
        if self.io.lock().is_none() {
            ctl.set_stop(0);
            return;
        }

        let frame = match self.ctxt.frame_queue().pop() {
            // 队列被 flush，不是错误
            None => return,
            Some(None) => {
                // EOS：停止并关闭（没有可转发的下游队列）
                ctl.set_stop(0);
                *self.io.lock() = None;
                return;
            }
            Some(Some(frame)) => frame,
        };

        let mut guard = self.io.lock();
        let Some(io) = guard.as_mut() else {
            ctl.set_stop(0);
            return;
        };

        let frame = frame.0;
        let samples = frame.samples();
        let planes: Vec<&[u8]> = if io.spec.is_planar() {
            (0..frame.planes()).map(|i| frame.data(i)).collect()
        } else {
            vec![frame.data(0)]
        };
        let spec = io.spec;
        let rv = io.transform.emit(&mut io.file, &planes, samples, &spec);
        let pts = frame.pts().unwrap_or(0);
        drop(planes);
        drop(frame);
        match rv {
            // 时间戳只记录成功落盘的帧
            Ok(()) => ctl.set_timestamp(pts),
            Err(e) => ctl.set_pause(io_error_code(&e)),
        }
    }
}
