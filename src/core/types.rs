use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::Sample;
use ffmpeg_next::Rational;

/// 音频流规格（open 成功后不变）
///
/// bitdepth 为容器内实际使用的有效位数，可能小于采样格式的容器位宽
/// （典型情况：24 bit 装在 32 bit 容器里）
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    /// 采样格式（隐含容器位宽与 planar/interleaved 布局）
    pub format: Sample,
    /// 时间戳单位，pts 的一个刻度等于 num/den 秒
    pub timebase: Rational,
    /// 总时长，以 timebase 为单位
    pub duration: i64,
    /// 每个采样的有效位数
    pub bitdepth: i32,
    /// 声道数
    pub channels: u16,
    /// 采样率
    pub rate: u32,
}

impl StreamSpec {
    /// 容器字节宽度（bw）
    pub fn bytes_per_sample(&self) -> usize {
        self.format.bytes()
    }

    /// 有效位数按字节向上取整（bd）
    pub fn bytes_per_depth(&self) -> usize {
        (self.bitdepth as usize + 7) / 8
    }

    pub fn is_planar(&self) -> bool {
        self.format.is_planar()
    }

    /// 有效位数小于容器位宽时需要做子采样搬运
    pub fn is_subsample(&self) -> bool {
        (self.bitdepth as usize) < self.bytes_per_sample() * 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self.format, Sample::F32(_) | Sample::F64(_))
    }

    /// 采样格式的 libav 数值编码（写入 .meta 侧车文件）
    pub fn format_code(&self) -> i32 {
        ffmpeg::ffi::AVSampleFormat::from(self.format) as i32
    }
}

/// 跨线程传递的压缩包
pub struct AudioPacket(pub ffmpeg::Packet);

unsafe impl Send for AudioPacket {}

/// 跨线程传递的解码帧
pub struct PcmFrame(pub ffmpeg::frame::Audio);

unsafe impl Send for PcmFrame {}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::util::format::sample::Type;

    fn spec_s32_24bit() -> StreamSpec {
        StreamSpec {
            format: Sample::I32(Type::Packed),
            timebase: Rational::new(1, 44100),
            duration: 0,
            bitdepth: 24,
            channels: 1,
            rate: 44100,
        }
    }

    #[test]
    fn test_subsample_widths() {
        let spec = spec_s32_24bit();
        assert_eq!(spec.bytes_per_sample(), 4);
        assert_eq!(spec.bytes_per_depth(), 3);
        assert!(spec.is_subsample());
        assert!(!spec.is_planar());
        assert!(!spec.is_float());
    }

    #[test]
    fn test_full_sample_widths() {
        let spec = StreamSpec {
            format: Sample::I16(Type::Planar),
            timebase: Rational::new(1, 48000),
            duration: 0,
            bitdepth: 16,
            channels: 2,
            rate: 48000,
        };
        assert_eq!(spec.bytes_per_sample(), 2);
        assert_eq!(spec.bytes_per_depth(), 2);
        assert!(!spec.is_subsample());
        assert!(spec.is_planar());
    }
}
