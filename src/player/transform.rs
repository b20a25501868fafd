use crate::core::StreamSpec;
use std::io::Write;

/// 帧数据到输出字节的搬运策略
///
/// open 时根据（布局 × 有效位数是否占满容器）选定一次，热路径直接调用。
/// 子采样时跳过每个容器低端的填充字节，偏移量为 bw - bd，
/// 与设备及 RIFF 对 24-in-32 的打包约定一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// 交错布局、占满容器：首平面整块连续输出
    FullInterleaved,
    /// planar 布局、占满容器：逐采样逐声道交错输出
    FullPlanar,
    /// 交错布局、子采样：逐容器跳过填充字节
    SubInterleaved,
    /// planar 布局、子采样：逐采样逐声道并跳过填充字节
    SubPlanar,
}

impl Transform {
    pub fn select(spec: &StreamSpec) -> Transform {
        match (spec.is_planar(), spec.is_subsample()) {
            (false, false) => Transform::FullInterleaved,
            (true, false) => Transform::FullPlanar,
            (false, true) => Transform::SubInterleaved,
            (true, true) => Transform::SubPlanar,
        }
    }

    /// 把一帧各平面的有效字节写入 out
    ///
    /// interleaved 时仅 planes[0] 有效；planar 时每声道一个平面。
    /// 输出始终是采样优先、声道内序的交错字节流。
    pub fn emit<W: Write>(
        &self,
        out: &mut W,
        planes: &[&[u8]],
        samples: usize,
        spec: &StreamSpec,
    ) -> std::io::Result<()> {
        let bw = spec.bytes_per_sample();
        let bd = spec.bytes_per_depth();
        let channels = spec.channels as usize;
        match self {
            Transform::FullInterleaved => {
                out.write_all(&planes[0][..samples * channels * bw])
            }
            Transform::FullPlanar => {
                for s in 0..samples {
                    for plane in planes.iter().take(channels) {
                        out.write_all(&plane[s * bw..(s + 1) * bw])?;
                    }
                }
                Ok(())
            }
            Transform::SubInterleaved => {
                let off = bw - bd;
                for i in 0..samples * channels {
                    out.write_all(&planes[0][i * bw + off..(i + 1) * bw])?;
                }
                Ok(())
            }
            Transform::SubPlanar => {
                let off = bw - bd;
                for s in 0..samples {
                    for plane in planes.iter().take(channels) {
                        out.write_all(&plane[s * bw + off..(s + 1) * bw])?;
                    }
                }
                Ok(())
            }
        }
    }

    /// 一帧产生的输出字节数
    pub fn emitted_len(&self, samples: usize, spec: &StreamSpec) -> usize {
        let unit = match self {
            Transform::FullInterleaved | Transform::FullPlanar => spec.bytes_per_sample(),
            Transform::SubInterleaved | Transform::SubPlanar => spec.bytes_per_depth(),
        };
        samples * spec.channels as usize * unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::util::format::sample::{Sample, Type};
    use ffmpeg_next::Rational;

    fn spec(format: Sample, bitdepth: i32, channels: u16) -> StreamSpec {
        StreamSpec {
            format,
            timebase: Rational::new(1, 44100),
            duration: 0,
            bitdepth,
            channels,
            rate: 44100,
        }
    }

    #[test]
    fn test_select_by_layout_and_fit() {
        let s = spec(Sample::I16(Type::Packed), 16, 2);
        assert_eq!(Transform::select(&s), Transform::FullInterleaved);
        let s = spec(Sample::I16(Type::Planar), 16, 2);
        assert_eq!(Transform::select(&s), Transform::FullPlanar);
        let s = spec(Sample::I32(Type::Packed), 24, 2);
        assert_eq!(Transform::select(&s), Transform::SubInterleaved);
        let s = spec(Sample::I32(Type::Planar), 24, 2);
        assert_eq!(Transform::select(&s), Transform::SubPlanar);
    }

    #[test]
    fn test_full_interleaved_contiguous() {
        let s = spec(Sample::I16(Type::Packed), 16, 2);
        let data: Vec<u8> = (0..8).collect(); // 2 采样 × 2 声道 × 2 字节
        let mut out = Vec::new();
        Transform::FullInterleaved
            .emit(&mut out, &[&data], 2, &s)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_full_planar_interleaves_channels() {
        let s = spec(Sample::I16(Type::Planar), 16, 2);
        let left = [0x11, 0x12, 0x21, 0x22]; // L0 L1
        let right = [0x31, 0x32, 0x41, 0x42]; // R0 R1
        let mut out = Vec::new();
        Transform::FullPlanar
            .emit(&mut out, &[&left, &right], 2, &s)
            .unwrap();
        // L0 R0 L1 R1
        assert_eq!(out, vec![0x11, 0x12, 0x31, 0x32, 0x21, 0x22, 0x41, 0x42]);
    }

    #[test]
    fn test_sub_interleaved_skips_padding() {
        // 24-in-32：每容器低 1 字节是填充，输出高 3 字节
        let s = spec(Sample::I32(Type::Packed), 24, 1);
        let data = [0xDD, 0xCC, 0xBB, 0xAA, 0x44, 0x33, 0x22, 0x11];
        let mut out = Vec::new();
        Transform::SubInterleaved
            .emit(&mut out, &[&data], 2, &s)
            .unwrap();
        assert_eq!(out, vec![0xCC, 0xBB, 0xAA, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_sub_planar_skips_padding_per_channel() {
        let s = spec(Sample::I32(Type::Planar), 24, 2);
        let left = [0xD0, 0xC0, 0xB0, 0xA0];
        let right = [0xD1, 0xC1, 0xB1, 0xA1];
        let mut out = Vec::new();
        Transform::SubPlanar
            .emit(&mut out, &[&left, &right], 1, &s)
            .unwrap();
        assert_eq!(out, vec![0xC0, 0xB0, 0xA0, 0xC1, 0xB1, 0xA1]);
    }

    #[test]
    fn test_emitted_len_independent_of_layout() {
        // 输出长度 = 声道 × 采样 × bd（子采样）或 × bw（占满）
        let packed = spec(Sample::I32(Type::Packed), 24, 2);
        let planar = spec(Sample::I32(Type::Planar), 24, 2);
        assert_eq!(
            Transform::select(&packed).emitted_len(100, &packed),
            2 * 100 * 3
        );
        assert_eq!(
            Transform::select(&planar).emitted_len(100, &planar),
            2 * 100 * 3
        );

        let full = spec(Sample::F32(Type::Planar), 32, 2);
        assert_eq!(Transform::select(&full).emitted_len(100, &full), 2 * 100 * 4);
    }
}
