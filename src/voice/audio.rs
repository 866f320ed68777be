//! PCM conversions and WAV encoding

use crate::{Error, Result};

/// Session audio sample rate (mono)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per 100 ms frame at [`SAMPLE_RATE`]
pub const FRAME_SAMPLES: usize = 1_600;

/// Decode little-endian PCM16 bytes into `[-1.0, 1.0]` samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Encode samples as little-endian PCM16 bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| to_i16(s).to_le_bytes())
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode mono samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode synthesized audio into mono samples at [`SAMPLE_RATE`]
///
/// WAV input is read with its own header; anything else is treated as raw
/// PCM16 at `raw_sample_rate`. Multi-channel WAV is downmixed.
///
/// # Errors
///
/// Returns error if a WAV header is present but the file cannot be read, or
/// resampling fails
pub fn decode_audio(bytes: &[u8], raw_sample_rate: u32) -> Result<Vec<f32>> {
    if !bytes.starts_with(b"RIFF") {
        return resample(&pcm16_to_samples(bytes), raw_sample_rate, SAMPLE_RATE);
    }

    let reader = hound::WavReader::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Audio(format!("invalid WAV: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    #[allow(clippy::cast_precision_loss)]
    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    resample(&mono, spec.sample_rate, SAMPLE_RATE)
}

/// Input frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// FFT sub-chunks per block
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Resample mono audio with rubato's band-limited FFT resampler
///
/// The final partial block is zero-padded and flushed, and the filter delay
/// is trimmed so the output lines up with the input.
///
/// # Errors
///
/// Returns error if either rate is zero or resampling fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(Error::Audio(format!("cannot resample {from} Hz to {to} Hz")));
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from as usize,
        to as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let end = pos + resampler.input_frames_next();
        let block = resampler
            .process(&[&input[pos..end]], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&block[0]);
        pos = end;
    }

    if pos < input.len() {
        let tail: [&[f64]; 1] = [&input[pos..]];
        let block = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&block[0]);
    }

    // Push the delayed tail out of the filter
    while output.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f64]]>, None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}
