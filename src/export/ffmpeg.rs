//! H.264/MP4 export through ffmpeg.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next::{
    codec, encoder, format, frame, software::scaling, util::rational::Rational,
};
use image::RgbImage;

use super::{ExportSink, EXPORT_FPS};

const ENCODE_FORMAT: format::Pixel = format::Pixel::YUV420P;

struct EncoderState {
    octx: format::context::Output,
    encoder: encoder::Video,
    to_yuv: scaling::Context,
    rgb_frame: frame::Video,
    yuv_frame: frame::Video,
    stream_index: usize,
    time_base: Rational,
    width: u32,
    height: u32,
    pts: i64,
}

/// Writes letterboxed frames as H.264 in an MP4 container.
pub struct FfmpegSink {
    state: Option<EncoderState>,
}

impl FfmpegSink {
    pub fn new() -> Result<Self> {
        ffmpeg_next::init().context("initialize ffmpeg")?;
        Ok(Self { state: None })
    }
}

impl ExportSink for FfmpegSink {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn start(&mut self, width: u32, height: u32, path: &Path) -> Result<()> {
        let mut octx = format::output(&path)
            .with_context(|| format!("create output {}", path.display()))?;
        let codec = encoder::find(codec::Id::H264).context("H.264 encoder not found")?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let time_base = Rational::new(1, EXPORT_FPS as i32);
        let mut stream = octx.add_stream(codec)?;
        let mut builder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        builder.set_width(width);
        builder.set_height(height);
        builder.set_format(ENCODE_FORMAT);
        builder.set_time_base(time_base);
        builder.set_frame_rate(Some(Rational::new(EXPORT_FPS as i32, 1)));
        if global_header {
            builder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }
        let encoder = builder
            .open_as_with(
                codec,
                ffmpeg_next::Dictionary::from_iter([("preset", "fast")]),
            )
            .context("open H.264 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let stream_index = stream.index();

        let to_yuv = scaling::Context::get(
            format::Pixel::RGB24,
            width,
            height,
            ENCODE_FORMAT,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .context("create RGB to YUV scaler")?;

        octx.write_header().context("write output header")?;
        self.state = Some(EncoderState {
            octx,
            encoder,
            to_yuv,
            rgb_frame: frame::Video::new(format::Pixel::RGB24, width, height),
            yuv_frame: frame::Video::empty(),
            stream_index,
            time_base,
            width,
            height,
            pts: 0,
        });
        Ok(())
    }

    fn append_frame(&mut self, image: &RgbImage) -> Result<()> {
        let state = self.state.as_mut().context("ffmpeg sink not started")?;
        let row_bytes = state.width as usize * 3;
        let stride = state.rgb_frame.stride(0);
        let src = image.as_raw();
        let plane = state.rgb_frame.data_mut(0);
        for row in 0..state.height as usize {
            plane[row * stride..row * stride + row_bytes]
                .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
        }

        state
            .to_yuv
            .run(&state.rgb_frame, &mut state.yuv_frame)
            .context("RGB to YUV scaling")?;
        state.yuv_frame.set_pts(Some(state.pts));
        state.pts += 1;
        state
            .encoder
            .send_frame(&state.yuv_frame)
            .context("encoder send_frame")?;
        drain_packets(state)
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.take().context("ffmpeg sink not started")?;
        state.encoder.send_eof().context("encoder send_eof")?;
        drain_packets(&mut state)?;
        state.octx.write_trailer().context("write output trailer")?;
        Ok(())
    }
}

fn drain_packets(state: &mut EncoderState) -> Result<()> {
    let stream_time_base = state
        .octx
        .stream(state.stream_index)
        .map(|stream| stream.time_base())
        .ok_or_else(|| anyhow!("output stream {} missing", state.stream_index))?;
    let mut packet = ffmpeg_next::Packet::empty();
    while state.encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(state.stream_index);
        packet.rescale_ts(state.time_base, stream_time_base);
        packet
            .write_interleaved(&mut state.octx)
            .context("write encoded packet")?;
    }
    Ok(())
}
