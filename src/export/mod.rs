//! Transcript serialization into the downloadable formats.
//!
//! SRT numbers its cues and separates fractional seconds with a comma;
//! WebVTT opens with a `WEBVTT` header, skips cue numbers and uses a dot.
//! Plain text drops the timing entirely. Timestamps keep millisecond
//! precision and hour fields are not truncated, so long recordings and
//! edited text round-trip without loss.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::transcript::TranscriptSegment;

/// The download formats offered by the export endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Srt,
    Vtt,
    Txt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Srt => "srt",
            ExportFormat::Vtt => "vtt",
            ExportFormat::Txt => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Srt => "application/x-subrip",
            ExportFormat::Vtt => "text/vtt",
            ExportFormat::Txt => "text/plain",
        }
    }

    /// Filename offered in the `Content-Disposition` header.
    pub fn download_filename(&self) -> String {
        format!("edited_transcript.{}", self.extension())
    }

    pub fn render(&self, segments: &[TranscriptSegment]) -> String {
        match self {
            ExportFormat::Srt => to_srt(segments),
            ExportFormat::Vtt => to_vtt(segments),
            ExportFormat::Txt => to_plain_text(segments),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "srt" => Ok(ExportFormat::Srt),
            "vtt" => Ok(ExportFormat::Vtt),
            "txt" | "text" | "plain" => Ok(ExportFormat::Txt),
            _ => Err(anyhow!("Unknown export format: {} (expected srt, vtt or txt)", s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// SubRip: `index`, `start --> end`, text, blank line. Cues are 1-based.
pub fn to_srt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(segment.start_ms),
            srt_timestamp(segment.end_ms),
            segment.text
        ));
    }
    out
}

/// WebVTT: `WEBVTT` header, then unnumbered cues with dot separators.
pub fn to_vtt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            vtt_timestamp(segment.start_ms),
            vtt_timestamp(segment.end_ms),
            segment.text
        ));
    }
    out
}

/// Plain text: segment texts joined by single spaces, no timing.
pub fn to_plain_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn srt_timestamp(ms: i64) -> String {
    let (hours, minutes, seconds, millis) = split_ms(ms);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

fn vtt_timestamp(ms: i64) -> String {
    let (hours, minutes, seconds, millis) = split_ms(ms);
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

fn split_ms(ms: i64) -> (i64, i64, i64, i64) {
    let ms = ms.max(0);
    (
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        ms % 1_000,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start_ms: i64, end_ms: i64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(srt_timestamp(0), "00:00:00,000");
        assert_eq!(srt_timestamp(1500), "00:00:01,500");
        assert_eq!(srt_timestamp(3661500), "01:01:01,500");
        // hours keep growing instead of wrapping at 99
        assert_eq!(srt_timestamp(360_000_000), "100:00:00,000");
    }

    #[test]
    fn test_vtt_timestamp() {
        assert_eq!(vtt_timestamp(0), "00:00:00.000");
        assert_eq!(vtt_timestamp(3661500), "01:01:01.500");
    }

    #[test]
    fn test_timestamps_round_trip() {
        // formatted value must parse back to the exact millisecond
        fn parse_back(s: &str) -> i64 {
            let (hms, millis) = s.rsplit_once(',').unwrap();
            let parts: Vec<i64> = hms.split(':').map(|p| p.parse().unwrap()).collect();
            (parts[0] * 3600 + parts[1] * 60 + parts[2]) * 1000 + millis.parse::<i64>().unwrap()
        }
        for ms in [0i64, 1, 999, 1000, 59_999, 60_000, 3_599_999, 3_600_000, 86_399_999] {
            assert_eq!(parse_back(&srt_timestamp(ms)), ms);
        }
    }

    #[test]
    fn test_srt_document() {
        let segments = vec![
            segment(0, 2500, "Hello there."),
            segment(2500, 4000, "General greetings."),
        ];
        let expected = "1\n00:00:00,000 --> 00:00:02,500\nHello there.\n\n\
                        2\n00:00:02,500 --> 00:00:04,000\nGeneral greetings.\n\n";
        assert_eq!(to_srt(&segments), expected);
    }

    #[test]
    fn test_vtt_document() {
        let segments = vec![segment(0, 2500, "Hello there.")];
        assert_eq!(
            to_vtt(&segments),
            "WEBVTT\n\n00:00:00.000 --> 00:00:02.500\nHello there.\n\n"
        );
    }

    #[test]
    fn test_vtt_header_only_when_empty() {
        assert_eq!(to_vtt(&[]), "WEBVTT\n\n");
        assert_eq!(to_srt(&[]), "");
        assert_eq!(to_plain_text(&[]), "");
    }

    #[test]
    fn test_plain_text() {
        let segments = vec![
            segment(0, 1000, "Good morning"),
            segment(1000, 2000, "everyone."),
        ];
        assert_eq!(to_plain_text(&segments), "Good morning everyone.");
    }

    #[test]
    fn test_unicode_text_passes_through() {
        let segments = vec![segment(0, 1200, "你好，世界。")];
        let srt = to_srt(&segments);
        assert!(srt.contains("你好，世界。"));
        assert_eq!(to_plain_text(&segments), "你好，世界。");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("srt".parse::<ExportFormat>().unwrap(), ExportFormat::Srt);
        assert_eq!("VTT".parse::<ExportFormat>().unwrap(), ExportFormat::Vtt);
        assert_eq!("text".parse::<ExportFormat>().unwrap(), ExportFormat::Txt);
        assert!("doc".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_download_metadata() {
        assert_eq!(ExportFormat::Srt.download_filename(), "edited_transcript.srt");
        assert_eq!(ExportFormat::Vtt.content_type(), "text/vtt");
        assert_eq!(ExportFormat::Txt.extension(), "txt");
    }
}
