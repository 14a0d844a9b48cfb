//! Percentile based auto-gain.
//!
//! Clips are decoded to 16-bit stereo PCM by the transcoder, scaled so the
//! 99.5th percentile of sample magnitude lands at half of full scale
//! (about -6 dBFS), and encoded back.

use async_trait::async_trait;
use bytes::Bytes;
use chimeconf::ToolsConfig;
use std::time::{Duration, Instant};

use super::SoundSource;
use crate::error::{ChimeError, Result};
use crate::process;
use crate::types::ClipId;

/// Fraction of samples quieter than the reference sample.
pub const REFERENCE_PERCENTILE: f64 = 0.995;

/// Level the reference sample is scaled to, relative to full scale.
pub const TARGET_LEVEL: f64 = 0.5;

/// Gains this close to 1.0 leave samples untouched.
pub const UNITY_TOLERANCE: f64 = 1e-4;

const PCM_FORMAT: [&str; 6] = ["-f", "s16le", "-ac", "2", "-ar", "44100"];

/// Result of scaling one PCM buffer.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub pcm: Vec<u8>,
    pub gain: f64,
    /// Reference magnitude, `None` for an empty buffer.
    pub reference: Option<u16>,
    pub clipped: bool,
}

/// Magnitude at the reference percentile.
///
/// `i16::MIN` counts as `i16::MAX` so negation never overflows.
pub fn reference_amplitude(samples: &[i16]) -> Option<u16> {
    if samples.is_empty() {
        return None;
    }

    let mut magnitudes: Vec<u16> = samples.iter().map(|s| s.saturating_abs() as u16).collect();
    let index = ((magnitudes.len() as f64 * REFERENCE_PERCENTILE) as usize).min(magnitudes.len() - 1);
    let (_, reference, _) = magnitudes.select_nth_unstable(index);
    Some(*reference)
}

/// Gain that moves `reference` to [`TARGET_LEVEL`]. Silence and empty
/// clips get unity.
pub fn gain_for(reference: Option<u16>) -> f64 {
    match reference {
        Some(r) if r > 0 => (i16::MAX as f64 / r as f64) * TARGET_LEVEL,
        _ => 1.0,
    }
}

/// Scale a single sample, reporting whether it had to be clamped.
pub fn scale_sample(sample: i16, gain: f64) -> (i16, bool) {
    let scaled = (sample as f64 * gain).round();
    if scaled > i16::MAX as f64 {
        (i16::MAX, true)
    } else if scaled < i16::MIN as f64 {
        (i16::MIN, true)
    } else {
        (scaled as i16, false)
    }
}

/// Normalize interleaved little-endian 16-bit PCM.
///
/// A trailing odd byte is carried over unchanged.
pub fn normalize_pcm(pcm: &[u8]) -> Normalized {
    let chunks = pcm.chunks_exact(2);
    let remainder = chunks.remainder();
    let samples: Vec<i16> = chunks.map(|c| i16::from_le_bytes([c[0], c[1]])).collect();

    let reference = reference_amplitude(&samples);
    let gain = gain_for(reference);

    if (gain - 1.0).abs() < UNITY_TOLERANCE {
        return Normalized {
            pcm: pcm.to_vec(),
            gain,
            reference,
            clipped: false,
        };
    }

    let mut out = Vec::with_capacity(pcm.len());
    let mut clipped = false;
    for sample in samples {
        let (scaled, was_clipped) = scale_sample(sample, gain);
        clipped |= was_clipped;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    out.extend_from_slice(remainder);

    Normalized {
        pcm: out,
        gain,
        reference,
        clipped,
    }
}

/// ffmpeg-compatible transcoder driven over stdin/stdout.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    encode_format: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(program: impl Into<String>, encode_format: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            encode_format: encode_format.into(),
            timeout,
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::new(
            tools.transcoder.clone(),
            tools.encode_format.clone(),
            Duration::from_secs(tools.transcoder_timeout_secs),
        )
    }

    pub fn decode_args() -> Vec<String> {
        let mut args: Vec<String> = ["-i", "-", "-acodec", "pcm_s16le"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(PCM_FORMAT.iter().map(|s| s.to_string()));
        args.push("-".to_string());
        args
    }

    pub fn encode_args(&self) -> Vec<String> {
        let mut args: Vec<String> = PCM_FORMAT.iter().map(|s| s.to_string()).collect();
        args.extend(["-i", "-", "-f"].iter().map(|s| s.to_string()));
        args.push(self.encode_format.clone());
        args.push("-".to_string());
        args
    }

    /// Compressed clip to raw PCM.
    pub async fn decode(&self, encoded: Bytes) -> Result<Bytes> {
        self.run("decode", &Self::decode_args(), encoded).await
    }

    /// Raw PCM back to the configured container format.
    pub async fn encode(&self, pcm: Bytes) -> Result<Bytes> {
        self.run("encode", &self.encode_args(), pcm).await
    }

    async fn run(&self, stage: &str, args: &[String], input: Bytes) -> Result<Bytes> {
        let output = process::run(&self.program, args, Some(input), self.timeout)
            .await
            .map_err(|e| ChimeError::Processing(format!("{} {stage}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ChimeError::Processing(format!(
                "{} {stage} exited with {}: {}",
                self.program,
                output.status,
                args.join(" ")
            )));
        }

        Ok(Bytes::from(output.stdout))
    }
}

/// Wraps a source and normalizes every fetched clip.
///
/// Nothing is cached here; each fetch runs both transcoder passes.
pub struct NormalizingFilter {
    inner: Box<dyn SoundSource>,
    transcoder: Transcoder,
}

impl NormalizingFilter {
    pub fn new(inner: Box<dyn SoundSource>, transcoder: Transcoder) -> Self {
        Self { inner, transcoder }
    }
}

#[async_trait]
impl SoundSource for NormalizingFilter {
    async fn list_clips(&self) -> Result<Vec<ClipId>> {
        self.inner.list_clips().await
    }

    async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes> {
        let encoded = self.inner.fetch_clip(clip).await?;
        let started = Instant::now();

        let pcm = self.transcoder.decode(encoded).await?;
        let normalized = tokio::task::spawn_blocking(move || normalize_pcm(&pcm))
            .await
            .map_err(|e| ChimeError::Processing(format!("normalize task failed: {e}")))?;

        if normalized.clipped {
            tracing::info!(clip = %clip, gain = normalized.gain, "clipped while normalizing");
        }

        let encoded = self.transcoder.encode(Bytes::from(normalized.pcm)).await?;
        tracing::debug!(
            clip = %clip,
            gain = normalized.gain,
            reference = ?normalized.reference,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "normalized clip"
        );
        Ok(encoded)
    }

    async fn populate(&self, clips: &[ClipId]) -> Result<()> {
        self.inner.populate(clips).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    fn describe(&self) -> String {
        format!("normalize({})", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn from_pcm(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_reference_handles_most_negative_sample() {
        assert_eq!(reference_amplitude(&[i16::MIN]), Some(i16::MAX as u16));
        assert_eq!(reference_amplitude(&[]), None);
    }

    #[test]
    fn test_reference_is_the_percentile_sample() {
        // 1000 samples: index 995 of the sorted magnitudes
        let mut samples: Vec<i16> = (0..1000).map(|i| -(i as i16)).collect();
        samples.reverse();
        assert_eq!(reference_amplitude(&samples), Some(995));
    }

    #[test]
    fn test_empty_and_silent_buffers_use_unity() {
        let empty = normalize_pcm(&[]);
        assert_eq!(empty.gain, 1.0);
        assert!(empty.pcm.is_empty());
        assert!(!empty.clipped);

        let silence = to_pcm(&[0; 64]);
        let normalized = normalize_pcm(&silence);
        assert_eq!(normalized.gain, 1.0);
        assert_eq!(normalized.pcm, silence);
    }

    #[test]
    fn test_buffer_at_target_level_is_unchanged() {
        let samples: Vec<i16> = (0..400)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        let pcm = to_pcm(&samples);

        let normalized = normalize_pcm(&pcm);

        assert!((normalized.gain - 1.0).abs() < UNITY_TOLERANCE);
        assert_eq!(normalized.pcm, pcm);
        assert!(!normalized.clipped);
    }

    #[test]
    fn test_loud_outliers_clamp_and_flag() {
        // 996 quiet samples put the reference at 100; the outliers overflow.
        let mut samples = vec![100i16; 996];
        samples.extend([30000, -30000, i16::MAX, i16::MIN]);
        let pcm = to_pcm(&samples);

        let normalized = normalize_pcm(&pcm);
        let out = from_pcm(&normalized.pcm);

        assert!(normalized.clipped);
        assert_eq!(normalized.reference, Some(100));
        assert_eq!(out[996], i16::MAX);
        assert_eq!(out[997], i16::MIN);
        assert_eq!(out[999], i16::MIN);
        assert_eq!(out[0], (100.0 * normalized.gain).round() as i16);
    }

    #[test]
    fn test_quiet_buffer_is_raised_without_clipping() {
        let samples: Vec<i16> = (0..200)
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect();

        let normalized = normalize_pcm(&to_pcm(&samples));
        let out = from_pcm(&normalized.pcm);

        assert!(!normalized.clipped);
        assert!(normalized.gain > 2.0);
        assert!(out.iter().all(|s| (16383..=16384).contains(&s.unsigned_abs())));
    }

    #[test]
    fn test_trailing_odd_byte_is_kept() {
        let mut pcm = to_pcm(&[1000; 10]);
        pcm.push(0xAB);

        let normalized = normalize_pcm(&pcm);

        assert_eq!(normalized.pcm.len(), pcm.len());
        assert_eq!(normalized.pcm.last(), Some(&0xAB));
    }

    #[test]
    fn test_scale_sample_bounds() {
        assert_eq!(scale_sample(20000, 2.0), (i16::MAX, true));
        assert_eq!(scale_sample(-20000, 2.0), (i16::MIN, true));
        assert_eq!(scale_sample(-16384, 2.0), (i16::MIN, false));
        assert_eq!(scale_sample(100, 1.5), (150, false));
    }

    #[test]
    fn test_transcoder_args() {
        let transcoder = Transcoder::new("ffmpeg", "mp3", Duration::from_secs(1));
        assert_eq!(
            Transcoder::decode_args().join(" "),
            "-i - -acodec pcm_s16le -f s16le -ac 2 -ar 44100 -"
        );
        assert_eq!(
            transcoder.encode_args().join(" "),
            "-f s16le -ac 2 -ar 44100 -i - -f mp3 -"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcoder_failure_is_processing_error() {
        let transcoder = Transcoder::new("false", "mp3", Duration::from_secs(5));
        let err = transcoder.decode(Bytes::from_static(b"abc")).await.unwrap_err();
        assert!(matches!(err, ChimeError::Processing(_)));
    }
}
