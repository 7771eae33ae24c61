use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// ── Constants ────────────────────────────────────────────────────────────────

pub const IMAGE_SERVICE_ROOT: &str = "https://image.pollinations.ai";
pub const IMAGE_PROMPT_BASE: &str = "https://image.pollinations.ai/prompt/";
pub const AUDIO_SERVICE_ROOT: &str = "https://text.pollinations.ai/";
pub const AUDIO_LINK_LABEL: &str = "点击播放音频";

const SERVICE_DOMAIN: &str = "pollinations.ai";
const IMAGE_MARKER: &str = "![image]";

// ── Lazy static regexes ──────────────────────────────────────────────────────

static THINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

static IMAGE_PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://image\.pollinations\.ai/prompt/([^?]+)").unwrap());

static IMAGE_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://image\.pollinations\.ai/prompt/[^)]+").unwrap());

static AUDIO_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://text\.pollinations\.ai/([^?]+)").unwrap());

static AUDIO_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://text\.pollinations\.ai/[^)]+").unwrap());

// Last audio tier. Anything it matches is already caught by the structural
// pair above; it stays so the tier order is explicit.
static AUDIO_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://text\.pollinations\.ai/[^\s?)]+\?[^\s)]+").unwrap());

static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{4e00}-\x{9fa5}]").unwrap());

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s]").unwrap());

static WHITESPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("No image URL found in the model response")]
    NoImageUrl,
    #[error("No audio URL found in the model response")]
    NoAudioUrl,
}

// ── Public result types ──────────────────────────────────────────────────────

/// Which fallback produced an image URL, in decreasing order of fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Structural,
    Delimiter,
    MarkdownImage,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMatch {
    pub url: String,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMatch {
    pub audio_url: String,
    pub audio_text: String,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Remove every `<think>…</think>` span so reasoning text is never scanned.
pub fn strip_reasoning(text: &str) -> String {
    THINK_RE.replace_all(text, "").into_owned()
}

/// Pull an image URL out of a model response. The first tier that yields a
/// non-empty URL wins; later tiers are more permissive and never consulted once
/// an earlier one matched.
pub fn extract_image(response_text: &str, query_params: &str) -> Result<ImageMatch, ExtractionError> {
    let text = strip_reasoning(response_text);

    let found = structural_image_match(&text)
        .map(|url| (url, MatchTier::Structural))
        .or_else(|| delimiter_slice(&text, IMAGE_SERVICE_ROOT).map(|url| (url, MatchTier::Delimiter)))
        .or_else(|| markdown_image_target(&text).map(|url| (url, MatchTier::MarkdownImage)))
        .or_else(|| synthesize_image_url(&text, query_params).map(|url| (url, MatchTier::Synthesized)));

    match found {
        Some((url, tier)) => {
            tracing::debug!(?tier, %url, "image URL extracted");
            Ok(ImageMatch { url, tier })
        }
        None => {
            tracing::debug!("no image URL and no service mention in response");
            Err(ExtractionError::NoImageUrl)
        }
    }
}

/// Pull a playable audio URL and the surrounding narration out of a model
/// response. There is no synthesis tier: the voice parameters cannot be
/// rebuilt from prose.
pub fn extract_audio(response_text: &str) -> Result<AudioMatch, ExtractionError> {
    let text = strip_reasoning(response_text);

    let audio_url = structural_audio_match(&text)
        .or_else(|| first_match(&AUDIO_QUERY_RE, &text))
        .ok_or(ExtractionError::NoAudioUrl)?;

    let audio_text = remove_link_span(&text, &audio_url).trim().to_string();
    tracing::debug!(%audio_url, text_len = audio_text.len(), "audio URL extracted");

    Ok(AudioMatch {
        audio_url,
        audio_text,
    })
}

// ── Image tiers ──────────────────────────────────────────────────────────────

fn structural_image_match(text: &str) -> Option<String> {
    // The path-only match ignores the query string; the greedy pass recovers it.
    if !IMAGE_PROMPT_RE.is_match(text) {
        tracing::debug!("structural prompt match failed");
        return None;
    }
    first_match(&IMAGE_FULL_RE, text)
}

/// Slice from the first occurrence of `root` up to the next `)`.
fn delimiter_slice(text: &str, root: &str) -> Option<String> {
    let start = text.find(root)?;
    let end = start + text[start..].find(')')?;
    non_empty(&text[start..end])
}

/// Text between the first `(` and the next `)` after the `![image]` marker.
fn markdown_image_target(text: &str) -> Option<String> {
    let marker = text.find(IMAGE_MARKER)?;
    let open = marker + text[marker..].find('(')? + 1;
    let close = open + text[open..].find(')')?;
    non_empty(&text[open..close])
}

fn synthesize_image_url(text: &str, query_params: &str) -> Option<String> {
    if !text.contains(SERVICE_DOMAIN) {
        return None;
    }

    let description = sanitize_description(text);
    tracing::debug!(%description, "synthesizing image URL from response prose");

    let mut url = format!("{}{}", IMAGE_PROMPT_BASE, description);
    if !query_params.is_empty() {
        url.push('?');
        url.push_str(query_params);
    }
    Some(url)
}

/// Drop CJK characters and punctuation, then percent-encode whitespace runs.
fn sanitize_description(text: &str) -> String {
    let without_cjk = CJK_RE.replace_all(text, "");
    let words_only = NON_WORD_RE.replace_all(without_cjk.trim(), " ");
    WHITESPACE_RUN_RE
        .replace_all(words_only.trim(), "%20")
        .into_owned()
}

// ── Audio tiers ──────────────────────────────────────────────────────────────

fn structural_audio_match(text: &str) -> Option<String> {
    if !AUDIO_PATH_RE.is_match(text) {
        tracing::debug!("structural audio match failed");
        return None;
    }
    first_match(&AUDIO_FULL_RE, text)
}

/// Remove the markdown link wrapping `url` (any label), or the bare URL when it
/// was not wrapped.
fn remove_link_span(text: &str, url: &str) -> String {
    let pattern = format!(r"\[[^\]]*\]\({}\)", regex::escape(url));
    match Regex::new(&pattern) {
        Ok(link_re) if link_re.is_match(text) => link_re.replacen(text, 1, "").into_owned(),
        _ => text.replacen(url, "", 1),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn first_match(re: &Regex, text: &str) -> Option<String> {
    re.find(text).and_then(|m| non_empty(m.as_str()))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
