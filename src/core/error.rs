use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("ALSA 错误: {0}")]
    AlsaError(#[from] alsa::Error),

    #[error("无法打开输入: {0}")]
    OpenError(String),

    #[error("无法找到音频流")]
    NoAudioStream,

    #[error("输出错误: {0}")]
    SinkError(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// 无错误
pub const ENONE: i32 = 0;
/// 网络连接失败
pub const ENET_CONNFAIL: i32 = 0x10;
/// 网络传输失败
pub const ENET_TXFAIL: i32 = 0x20;
/// 解码器句柄无效
pub const EPCM_CODECINVAL: i32 = 0x100;
/// 解封装器句柄无效
pub const EPCM_FORMATINVAL: i32 = 0x200;

/// 把 worker 状态里的错误码翻译成可读文本
///
/// 自定义码各占独立比特位，可以按位组合；其余数值先按 libav
/// 错误码解释（负值 AVERROR），失败再退回系统 errno 描述
pub fn describe_error(error: i32) -> String {
    match error {
        ENONE => "无错误".to_string(),
        ENET_CONNFAIL => "网络连接失败".to_string(),
        ENET_TXFAIL => "网络传输失败".to_string(),
        EPCM_CODECINVAL => "无效的解码器上下文".to_string(),
        EPCM_FORMATINVAL => "无效的解封装上下文".to_string(),
        e if e == (EPCM_CODECINVAL | EPCM_FORMATINVAL) => {
            "无效的解封装与解码器上下文".to_string()
        }
        e if e < 0 => ffmpeg_next::Error::from(e).to_string(),
        e => std::io::Error::from_raw_os_error(e).to_string(),
    }
}

/// IO 错误到 worker 状态错误码，无 os 错误码时退回 EIO
pub fn io_error_code(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or(5) // EIO
}

/// libav 错误到 worker 状态错误码（负值 AVERROR）
///
/// Other 携带原始 errno，可无损还原为 AVERROR(errno)；
/// 其余常见变体映射回对应常量，剩下的归入 AVERROR_UNKNOWN
pub fn av_error_code(e: &ffmpeg_next::Error) -> i32 {
    use ffmpeg_next::ffi;
    match e {
        ffmpeg_next::Error::Other { errno } => -*errno,
        ffmpeg_next::Error::Eof => ffi::AVERROR_EOF,
        ffmpeg_next::Error::InvalidData => ffi::AVERROR_INVALIDDATA,
        ffmpeg_next::Error::BufferTooSmall => ffi::AVERROR_BUFFER_TOO_SMALL,
        _ => ffi::AVERROR_UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_disjoint() {
        // 各错误码比特区间互不重叠，才能按位组合
        assert_eq!(ENET_CONNFAIL & ENET_TXFAIL, 0);
        assert_eq!(EPCM_CODECINVAL & EPCM_FORMATINVAL, 0);
        assert_eq!(
            (ENET_CONNFAIL | ENET_TXFAIL) & (EPCM_CODECINVAL | EPCM_FORMATINVAL),
            0
        );
    }

    #[test]
    fn test_describe_combined() {
        let msg = describe_error(EPCM_CODECINVAL | EPCM_FORMATINVAL);
        assert!(msg.contains("解封装"));
        assert!(msg.contains("解码器"));
    }

    #[test]
    fn test_av_error_code_roundtrip() {
        // 状态码喂回 libav 错误映射后保持一致，describe_error 才能还原消息
        let eof = ffmpeg_next::ffi::AVERROR_EOF;
        assert_eq!(av_error_code(&ffmpeg_next::Error::from(eof)), eof);
        // AVERROR(EAGAIN) = -11
        assert_eq!(av_error_code(&ffmpeg_next::Error::Other { errno: 11 }), -11);
        assert_eq!(av_error_code(&ffmpeg_next::Error::from(-11)), -11);
    }
}
