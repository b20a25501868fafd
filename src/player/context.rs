use crate::core::{AudioPacket, DbQueue, PcmFrame, PipelineError, Result, StreamSpec};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::Once;

/// 包队列默认容量
pub const DEF_PACKET_QUEUE_CAP: usize = 1024;
/// 帧队列默认容量
pub const DEF_FRAME_QUEUE_CAP: usize = 1024;

/// 进程级 libav 一次性初始化（格式注册 + 网络支持）
static LIBAV_INIT: Once = Once::new();

fn init_libav() {
    LIBAV_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            log::error!("FFmpeg 初始化失败: {}", e);
        }
        format::network::init();
        info!("✅ FFmpeg 初始化完成（含网络支持）");
    });
}

/// 解封装侧状态：输入上下文与选中的音频流索引，二者同生共死
pub struct FormatState {
    pub input: format::context::Input,
    pub stream_index: usize,
}

impl FormatState {
    /// 选中音频流的时间基与总时长
    pub fn stream_info(&self) -> Option<(ffmpeg::Rational, i64)> {
        self.input
            .stream(self.stream_index)
            .map(|s| (s.time_base(), s.duration()))
    }
}

/// 单条音频流的共享上下文
///
/// 持有解封装器与解码器句柄以及包/帧两条队列；
/// 两把独立互斥锁允许 Reader（format）与 Decoder（decoder）并行工作。
/// 不变量：解封装器与解码器要么同时有效要么同时为空。
pub struct Context {
    fmt: Mutex<Option<FormatState>>,
    cdc: Mutex<Option<codec::decoder::Audio>>,
    pkt_q: DbQueue<Option<AudioPacket>>,
    frm_q: DbQueue<Option<PcmFrame>>,
}

impl Context {
    pub fn new(packet_queue_cap: usize, frame_queue_cap: usize) -> Self {
        Self {
            fmt: Mutex::new(None),
            cdc: Mutex::new(None),
            pkt_q: DbQueue::new(packet_queue_cap),
            frm_q: DbQueue::new(frame_queue_cap),
        }
    }

    /// 打开输入并定位最佳音频流，可重复调用（先关闭旧状态）
    ///
    /// 任一步骤失败时两侧句柄都保持为空，队列保持已清空状态
    pub fn open(&self, url: &str) -> Result<()> {
        init_libav();

        // 锁序固定：format 先于 decoder
        let mut fmt = self.fmt.lock();
        let mut cdc = self.cdc.lock();
        *fmt = None;
        *cdc = None;
        self.frm_q.flush();
        self.pkt_q.flush();

        info!("正在打开输入: {}", url);

        let is_network = url.starts_with("http://") || url.starts_with("https://");
        let input = if is_network {
            info!("🌐 检测到网络流，应用重连选项");
            let mut options = ffmpeg::Dictionary::new();
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");
            options.set("rw_timeout", "8000000"); // 读写 8s 超时
            format::input_with_dictionary(&url, options)
                .map_err(|e| PipelineError::OpenError(format!("{}: {}", url, e)))?
        } else {
            format::input(&url).map_err(|e| PipelineError::OpenError(format!("{}: {}", url, e)))?
        };

        let (stream_index, decoder) = {
            let stream = input
                .streams()
                .best(media::Type::Audio)
                .ok_or(PipelineError::NoAudioStream)?;
            let decoder = codec::context::Context::from_parameters(stream.parameters())?
                .decoder()
                .audio()?;
            (stream.index(), decoder)
        };

        debug!(
            "音频流索引: {}, 格式: {:?}, {} Hz, {} 声道",
            stream_index,
            decoder.format(),
            decoder.rate(),
            decoder.channels()
        );

        *fmt = Some(FormatState {
            input,
            stream_index,
        });
        *cdc = Some(decoder);
        Ok(())
    }

    /// 释放解封装器与解码器并清空两条队列
    pub fn close(&self) {
        {
            let mut fmt = self.fmt.lock();
            let mut cdc = self.cdc.lock();
            *fmt = None;
            *cdc = None;
        }
        self.frm_q.flush();
        self.pkt_q.flush();
    }

    /// 当前流规格快照，解封装器或解码器无效时返回 None
    pub fn stream_spec(&self) -> Option<StreamSpec> {
        let fmt = self.fmt.lock();
        let cdc = self.cdc.lock();
        let (fmt, dec) = match (fmt.as_ref(), cdc.as_ref()) {
            (Some(f), Some(d)) => (f, d),
            _ => return None,
        };
        let stream = fmt.input.stream(fmt.stream_index)?;
        // bits_per_raw_sample 未填写时按容器位宽处理
        let mut bitdepth = unsafe { (*dec.as_ptr()).bits_per_raw_sample };
        if bitdepth == 0 {
            bitdepth = (dec.format().bytes() * 8) as i32;
        }
        Some(StreamSpec {
            format: dec.format(),
            timebase: stream.time_base(),
            duration: stream.duration(),
            bitdepth,
            channels: dec.channels(),
            rate: dec.rate(),
        })
    }

    /// 独占访问解封装状态，句柄无效时返回 None（锁随之释放）
    pub fn lock_format(&self) -> Option<MappedMutexGuard<'_, FormatState>> {
        MutexGuard::try_map(self.fmt.lock(), Option::as_mut).ok()
    }

    /// 独占访问解码器，句柄无效时返回 None（锁随之释放）
    pub fn lock_decoder(&self) -> Option<MappedMutexGuard<'_, codec::decoder::Audio>> {
        MutexGuard::try_map(self.cdc.lock(), Option::as_mut).ok()
    }

    /// 包队列，弹出的包归调用方所有
    pub fn packet_queue(&self) -> &DbQueue<Option<AudioPacket>> {
        &self.pkt_q
    }

    /// 帧队列，弹出的帧归调用方所有
    pub fn frame_queue(&self) -> &DbQueue<Option<PcmFrame>> {
        &self.frm_q
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEF_PACKET_QUEUE_CAP, DEF_FRAME_QUEUE_CAP)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}
