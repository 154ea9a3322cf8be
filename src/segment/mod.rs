//! Structure-preserving segmentation pipeline.
//! The input is partitioned into code blocks, separators, and translatable
//! segments; only the translatable cores go through the engine, everything
//! else is carried verbatim, so identity reassembly is byte-exact. Emoji
//! are protected by placeholder tokens for the duration of the trip.

pub mod emoji;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::engine::pool::EnginePool;
use crate::engine::{EngineError, EngineRequest};
use crate::task::TierName;
use emoji::{EmojiExtractor, EmojiPlaceholder};

/// Structural kind of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Paragraph,
    ListItem,
    CodeBlock,
    Separator,
}

/// One structural unit of the input text. Segment texts are exact slices:
/// concatenating them in order recreates the input.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub kind: SegmentKind,
    pub text: String,
}

impl Segment {
    pub fn translatable(&self) -> bool {
        matches!(self.kind, SegmentKind::Paragraph | SegmentKind::ListItem)
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        return !rest.trim().is_empty();
    }
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    matches!(trimmed[digits..].chars().next(), Some('.') | Some(')'))
}

/// Split into lines, each retaining its terminating newline.
fn split_keep_newlines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(i) = text[start..].find('\n') {
        lines.push(&text[start..start + i + 1]);
        start += i + 1;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Partition text into an ordered list of segments. A strict partition:
/// every byte of the input lands in exactly one segment.
pub fn partition(text: &str) -> Vec<Segment> {
    let lines = split_keep_newlines(text);
    let mut segments: Vec<Segment> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_kind: Option<SegmentKind> = None;
    let mut in_code = false;

    let flush = |buffer: &mut String, kind: &mut Option<SegmentKind>, segments: &mut Vec<Segment>| {
        if let Some(k) = kind.take() {
            if !buffer.is_empty() {
                segments.push(Segment {
                    index: segments.len(),
                    kind: k,
                    text: std::mem::take(buffer),
                });
            }
        }
    };

    for line in lines {
        if in_code {
            buffer.push_str(line);
            if is_fence(line) {
                in_code = false;
                flush(&mut buffer, &mut buffer_kind, &mut segments);
            }
            continue;
        }

        if is_fence(line) {
            flush(&mut buffer, &mut buffer_kind, &mut segments);
            buffer_kind = Some(SegmentKind::CodeBlock);
            buffer.push_str(line);
            in_code = true;
        } else if is_blank(line) {
            if buffer_kind != Some(SegmentKind::Separator) {
                flush(&mut buffer, &mut buffer_kind, &mut segments);
                buffer_kind = Some(SegmentKind::Separator);
            }
            buffer.push_str(line);
        } else if is_list_item(line) {
            flush(&mut buffer, &mut buffer_kind, &mut segments);
            buffer_kind = Some(SegmentKind::ListItem);
            buffer.push_str(line);
            flush(&mut buffer, &mut buffer_kind, &mut segments);
        } else {
            if buffer_kind != Some(SegmentKind::Paragraph) {
                flush(&mut buffer, &mut buffer_kind, &mut segments);
                buffer_kind = Some(SegmentKind::Paragraph);
            }
            buffer.push_str(line);
        }
    }
    flush(&mut buffer, &mut buffer_kind, &mut segments);

    segments
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub text: String,
    pub confidence: f32,
    pub segments_translated: usize,
    pub placeholders_repaired: usize,
    pub bypassed: bool,
}

struct SegmentJob {
    index: usize,
    prefix: String,
    core: String,
    suffix: String,
    placeholders: Vec<EmojiPlaceholder>,
}

/// Splits, translates, verifies, and reassembles one text.
pub struct SegmentPipeline {
    extractor: EmojiExtractor,
    segment_concurrency: usize,
    bypass_max_chars: usize,
    engine_timeout: Duration,
}

impl SegmentPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            extractor: EmojiExtractor::new(),
            segment_concurrency: config.segment_concurrency,
            bypass_max_chars: config.bypass_max_chars,
            engine_timeout: config.engine_timeout,
        }
    }

    /// Short inputs with no structure to preserve skip segmentation.
    fn bypasses(&self, text: &str) -> bool {
        text.chars().count() <= self.bypass_max_chars
            && !text.lines().any(|l| is_blank(l) || is_fence(l))
            && !self.extractor.contains_emoji(text)
    }

    /// Translate `text` from `source_lang` to `target_lang` on `tier`,
    /// preserving structure. Fails with the first engine error encountered.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        tier: TierName,
        pool: &Arc<EnginePool>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, EngineError> {
        if self.bypasses(text) {
            let reply = self
                .call_engine(pool, text.to_string(), source_lang, target_lang, tier, cancel)
                .await?;
            return Ok(PipelineOutput {
                text: reply.text,
                confidence: reply.confidence,
                segments_translated: 1,
                placeholders_repaired: 0,
                bypassed: true,
            });
        }

        let (tokenized, placeholders) = self.extractor.extract(text);
        let segments = partition(&tokenized);

        let jobs: Vec<SegmentJob> = segments
            .iter()
            .filter(|s| s.translatable())
            .filter_map(|s| make_job(s, &placeholders))
            .collect();

        let mut results: Vec<(usize, String, f32, usize, usize)> =
            Vec::with_capacity(jobs.len());
        let mut stream = stream::iter(jobs.into_iter().map(|job| {
            let pool = Arc::clone(pool);
            let cancel = cancel.clone();
            async move {
                let reply = self
                    .call_engine(&pool, job.core.clone(), source_lang, target_lang, tier, &cancel)
                    .await?;
                let (verified, repaired) = emoji::repair_missing(&reply.text, &job.placeholders);
                let weight = job.core.chars().count();
                Ok::<_, EngineError>((
                    job.index,
                    format!("{}{}{}", job.prefix, verified, job.suffix),
                    reply.confidence,
                    weight,
                    repaired,
                ))
            }
        }))
        .buffer_unordered(self.segment_concurrency);

        while let Some(result) = stream.next().await {
            results.push(result?);
        }
        drop(stream);

        let mut translated: Vec<Option<String>> = vec![None; segments.len()];
        let mut weighted_confidence = 0.0f64;
        let mut total_weight = 0usize;
        let mut repaired_total = 0usize;
        let segments_translated = results.len();

        for (index, text, confidence, weight, repaired) in results {
            translated[index] = Some(text);
            weighted_confidence += confidence as f64 * weight as f64;
            total_weight += weight;
            repaired_total += repaired;
        }

        if repaired_total > 0 {
            debug!(
                repaired = repaired_total,
                "reinserted placeholders lost in translation"
            );
        }

        let mut assembled = String::with_capacity(tokenized.len());
        for segment in &segments {
            match translated[segment.index].take() {
                Some(text) => assembled.push_str(&text),
                None => assembled.push_str(&segment.text),
            }
        }

        let restored = self.extractor.restore(&assembled, &placeholders);
        let confidence = if total_weight == 0 {
            1.0
        } else {
            (weighted_confidence / total_weight as f64) as f32
        };

        Ok(PipelineOutput {
            text: restored,
            confidence,
            segments_translated,
            placeholders_repaired: repaired_total,
            bypassed: false,
        })
    }

    async fn call_engine(
        &self,
        pool: &Arc<EnginePool>,
        text: String,
        source_lang: &str,
        target_lang: &str,
        tier: TierName,
        cancel: &CancellationToken,
    ) -> Result<crate::engine::EngineReply, EngineError> {
        let mut handle = pool.checkout().await;
        let request = EngineRequest {
            text,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            tier,
        };
        match tokio::time::timeout(self.engine_timeout, handle.translate(request, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }
}

/// Prepare one translatable segment: keep surrounding whitespace and list
/// markers out of the engine's hands.
fn make_job(segment: &Segment, all_placeholders: &[EmojiPlaceholder]) -> Option<SegmentJob> {
    let text = segment.text.as_str();
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len().max(start);

    let mut prefix = text[..start].to_string();
    let mut core = &text[start..end];
    let suffix = text[end..].to_string();

    if segment.kind == SegmentKind::ListItem {
        let (marker, rest) = split_list_marker(core);
        prefix.push_str(marker);
        core = rest;
    }
    if core.is_empty() {
        return None;
    }

    let placeholders = all_placeholders
        .iter()
        .filter(|ph| core.contains(&ph.token))
        .cloned()
        .collect();

    Some(SegmentJob {
        index: segment.index,
        prefix,
        core: core.to_string(),
        suffix,
        placeholders,
    })
}

fn split_list_marker(core: &str) -> (&str, &str) {
    for bullet in ["- ", "* ", "+ "] {
        if core.starts_with(bullet) {
            return core.split_at(bullet.len());
        }
    }
    let digits = core.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &core[digits..];
        if let Some(sep) = rest.chars().next() {
            if sep == '.' || sep == ')' {
                let mut cut = digits + sep.len_utf8();
                if rest[1..].starts_with(' ') {
                    cut += 1;
                }
                return core.split_at(cut);
            }
        }
    }
    ("", core)
}
