//! # Comments — Draft and Compliance Pipeline
//!
//! Produces the text for a comment action at dispatch time, so the voice
//! profile and avoid-phrase list are read fresh for every attempt.
//!
//! ## Stages
//!
//! 1. **Draft**: a [`CommentDrafter`] returns one to three short candidates
//!    conditioned on post content, the user's voice profile, page tags and
//!    the site's register (LinkedIn professional, Instagram casual, Facebook
//!    friendly). [`OpenRouterDrafter`] is the production drafter.
//! 2. **Compliance**: candidates are checked in order against the org's
//!    avoid phrases (global defaults plus org additions) and structural
//!    rules: no em/en dashes, no banned openers, at most N sentences, not
//!    empty. A failing candidate is rewritten once (phrases removed, dashes
//!    replaced, opener stripped) and re-checked; if it still fails the next
//!    candidate is tried. When every candidate fails the result is
//!    [`EngineError::ContentPolicyViolation`]. Unchecked text never leaves
//!    this module.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CommentsConfig;
use crate::error::EngineError;
use crate::models::{Surface, VoiceProfile};
use crate::store::Store;

/// Global avoid-phrase defaults, seeded with `org_id = NULL`.
pub const DEFAULT_AVOID_PHRASES: &[&str] = &[
    "thanks for sharing",
    "great insights",
    "this is very insightful",
    "couldn't agree more",
    "spot on",
    "well said",
    "great post",
    "love this",
    "so true",
    "this resonates",
    "beautifully written",
    "nailed it",
    "this is gold",
    "food for thought",
    "game changer",
    "totally agree",
    "this is a must-read",
    "absolutely brilliant",
    "\u{2014}",
    "\u{2013}",
];

/// Openers that read as filler regardless of the org's list.
const BANNED_OPENERS: &[&str] = &[
    "thanks for sharing",
    "thank you for sharing",
    "great post",
    "nice post",
    "amazing post",
    "interesting post",
    "great insights",
    "love this",
    "what a great",
    "wow",
];

const DASHES: &[char] = &['\u{2014}', '\u{2013}'];

static DASH_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[\u{2014}\u{2013}]+\s*").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.!?;:])").expect("static regex"));
static STACKED_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;:]\s*([,.!?;:])").expect("static regex"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(\s+|$)").expect("static regex"));
static CODE_FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json)?\s*").expect("static regex"));
static CODE_FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("static regex"));

// ── Draft stage ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub surface: Surface,
    pub post_content: String,
    pub voice: VoiceProfile,
    pub page_tags: Vec<String>,
    pub avoid_phrases: Vec<String>,
    pub max_candidates: usize,
}

#[async_trait]
pub trait CommentDrafter: Send + Sync {
    /// Candidate comments, best first.
    async fn draft(&self, request: &DraftRequest) -> Result<Vec<String>>;
}

fn platform_intro(surface: Surface) -> &'static str {
    match surface {
        Surface::Linkedin => {
            "You write short, authentic comments on LinkedIn posts in the voice of a real professional.\n\n\
             STYLE: professional but conversational. No hashtags. At most one or two emojis. \
             Use industry vocabulary where it fits. Sound like a colleague, not a marketer."
        }
        Surface::Instagram => {
            "You write short, authentic comments on Instagram posts in the voice of a real person.\n\n\
             STYLE: casual, warm and brief, one or two short sentences. One or two emojis are fine. \
             Informal language is fine. Sound like a friend, not a brand. Never use hashtags."
        }
        Surface::Facebook => {
            "You write short, authentic comments on Facebook posts in the voice of a real person.\n\n\
             STYLE: friendly and conversational, one to three sentences. Emojis occasionally. \
             Sound like a friendly acquaintance. A short follow-up question or related thought works well."
        }
    }
}

fn surface_label(surface: Surface) -> &'static str {
    match surface {
        Surface::Linkedin => "LinkedIn",
        Surface::Instagram => "Instagram",
        Surface::Facebook => "Facebook",
    }
}

/// System prompt for the drafting model.
pub fn build_system_prompt(request: &DraftRequest) -> String {
    let phrases = request
        .avoid_phrases
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join(", ");

    let tone = &request.voice.tone;
    let mut custom = String::new();
    if !tone.custom_rules.is_empty() {
        custom.push_str("CUSTOM WRITING RULES:\n");
        for rule in &tone.custom_rules {
            custom.push_str(&format!("- {}\n", rule));
        }
    }
    if let Some(examples) = tone.example_comments.as_deref().filter(|e| !e.trim().is_empty()) {
        custom.push_str(&format!("\nEXAMPLE COMMENTS (match this style):\n{}\n", examples));
    }

    let mut preferences = Vec::new();
    if let Some(f) = &tone.formality {
        preferences.push(format!("formality: {}", f));
    }
    if let Some(e) = &tone.emoji_usage {
        preferences.push(format!("emoji usage: {}", e));
    }
    for (k, v) in &tone.extra {
        preferences.push(format!("{}: {}", k, v));
    }
    let tone_line = if preferences.is_empty() {
        String::new()
    } else {
        format!("TONE PREFERENCES: {}", preferences.join("; "))
    };

    let profile = if request.voice.profile_text.trim().is_empty() {
        "No profile provided. Use a friendly professional tone."
    } else {
        request.voice.profile_text.trim()
    };

    format!(
        "{intro}\n\n\
         RULES:\n\
         1. Write 1-{n} short comment variants, 1-3 sentences each, one-liners preferred.\n\
         2. Sound conversational and human.\n\
         3. Reference a specific detail from the post.\n\
         4. Add something: a quick opinion, a question, or a related experience.\n\
         5. Never use these phrases: {phrases}\n\
         6. Never be generic.\n\
         7. Match the user's profile and tone below.\n\
         8. Never use em dashes or en dashes. Use commas, periods or semicolons.\n\n\
         {custom}\n\
         USER PROFILE:\n{profile}\n\n\
         {tone_line}\n\n\
         Respond with a JSON object: {{\"comments\": [\"comment1\", \"comment2\"]}}",
        intro = platform_intro(request.surface),
        n = request.max_candidates.clamp(1, 3),
    )
}

pub fn build_user_message(request: &DraftRequest) -> String {
    let mut msg = format!(
        "Write comments for this {} post:\n\n{}",
        surface_label(request.surface),
        request.post_content
    );
    if !request.page_tags.is_empty() {
        msg.push_str(&format!(
            "\n\nRelationship context: this page is tagged as: {}",
            request.page_tags.join(", ")
        ));
    }
    msg
}

#[derive(Deserialize)]
struct CandidateEnvelope {
    #[serde(default)]
    comments: Vec<String>,
}

/// Extract candidates from a model reply, tolerating code fences and plain text.
pub fn parse_candidates(content: &str, max: usize) -> Vec<String> {
    let trimmed = content.trim();
    let cleaned = CODE_FENCE_OPEN.replace(trimmed, "");
    let cleaned = CODE_FENCE_CLOSE.replace(&cleaned, "").to_string();
    let candidates = match serde_json::from_str::<CandidateEnvelope>(&cleaned) {
        Ok(env) => env.comments,
        Err(_) => vec![cleaned.trim().to_string()],
    };
    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .take(max.max(1))
        .collect()
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Drafter backed by the OpenRouter chat-completions API.
pub struct OpenRouterDrafter {
    api_key: String,
    http: reqwest::Client,
    config: CommentsConfig,
}

impl OpenRouterDrafter {
    pub fn new(api_key: &str, config: CommentsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(OpenRouterDrafter {
            api_key: api_key.to_string(),
            http,
            config,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("AutoEngage"));
        Ok(headers)
    }
}

#[async_trait]
impl CommentDrafter for OpenRouterDrafter {
    async fn draft(&self, request: &DraftRequest) -> Result<Vec<String>> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: build_system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_message(request),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(model = %self.config.model, surface = %request.surface, "OpenRouter draft request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenRouter API error ({}): {}", status, error_text));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response from OpenRouter"))?;
        Ok(parse_candidates(&content, request.max_candidates))
    }
}

// ── Compliance stage ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", content = "detail", rename_all = "snake_case")]
pub enum Violation {
    AvoidPhrase(String),
    Dash(char),
    BannedOpener(String),
    TooManySentences(usize),
    Empty,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::AvoidPhrase(p) => write!(f, "avoid phrase \"{}\"", p),
            Violation::Dash(c) => write!(f, "dash character U+{:04X}", *c as u32),
            Violation::BannedOpener(o) => write!(f, "banned opener \"{}\"", o),
            Violation::TooManySentences(n) => write!(f, "{} sentences", n),
            Violation::Empty => f.write_str("empty comment"),
        }
    }
}

struct PhraseRule {
    phrase: String,
    pattern: Regex,
}

/// Compiled avoid-phrase and structural rules for one organization.
pub struct ComplianceRules {
    phrases: Vec<PhraseRule>,
    max_sentences: usize,
}

fn fold_apostrophes(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
}

impl ComplianceRules {
    pub fn new<I, S>(phrases: I, max_sentences: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules: Vec<PhraseRule> = Vec::new();
        for raw in phrases {
            let phrase = fold_apostrophes(raw.as_ref().trim()).to_lowercase();
            if phrase.is_empty() || rules.iter().any(|r| r.phrase == phrase) {
                continue;
            }
            // Dash entries are covered by the structural dash rule.
            if phrase.chars().all(|c| DASHES.contains(&c)) {
                continue;
            }
            let escaped = regex::escape(&phrase);
            let starts_word = phrase.chars().next().is_some_and(char::is_alphanumeric);
            let ends_word = phrase.chars().last().is_some_and(char::is_alphanumeric);
            let pattern = format!(
                "(?i){}{}{}",
                if starts_word { r"\b" } else { "" },
                escaped,
                if ends_word { r"\b" } else { "" }
            );
            if let Ok(pattern) = Regex::new(&pattern) {
                rules.push(PhraseRule { phrase, pattern });
            }
        }
        ComplianceRules {
            phrases: rules,
            max_sentences: max_sentences.max(1),
        }
    }

    pub fn check(&self, text: &str) -> Vec<Violation> {
        let text = fold_apostrophes(text);
        let mut violations = Vec::new();
        if !text.chars().any(char::is_alphanumeric) {
            violations.push(Violation::Empty);
            return violations;
        }
        for c in DASHES {
            if text.contains(*c) {
                violations.push(Violation::Dash(*c));
            }
        }
        if let Some((opener, _)) = banned_opener(&text) {
            violations.push(Violation::BannedOpener(opener.to_string()));
        }
        for rule in &self.phrases {
            if rule.pattern.is_match(&text) {
                violations.push(Violation::AvoidPhrase(rule.phrase.clone()));
            }
        }
        let sentences = count_sentences(&text);
        if sentences > self.max_sentences {
            violations.push(Violation::TooManySentences(sentences));
        }
        violations
    }

    /// Remove offending fragments. The result must be re-checked.
    pub fn rewrite(&self, text: &str) -> String {
        let mut out = fold_apostrophes(text);
        out = DASH_RUN.replace_all(&out, ", ").into_owned();
        for rule in &self.phrases {
            out = rule.pattern.replace_all(&out, "").into_owned();
        }
        let mut out = tidy(&out);
        while let Some((_, end)) = banned_opener(&out) {
            out = tidy(&out[end..]);
        }
        out
    }
}

/// Banned opener at the start of `text`, and the byte offset in `text` where
/// it ends. Case folding can change byte lengths, so the offset is counted on
/// the original characters.
fn banned_opener(text: &str) -> Option<(&'static str, usize)> {
    let start = text.len() - text.trim_start().len();
    BANNED_OPENERS.iter().copied().find_map(|opener| {
        let mut folded = String::with_capacity(opener.len());
        let mut end = start;
        for (i, c) in text[start..].char_indices() {
            if folded.len() >= opener.len() {
                break;
            }
            folded.extend(c.to_lowercase());
            end = start + i + c.len_utf8();
        }
        let word_ends = !text[end..].chars().next().is_some_and(char::is_alphanumeric);
        (folded == opener && word_ends).then_some((opener, end))
    })
}

fn count_sentences(text: &str) -> usize {
    SENTENCE_END
        .split(text)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
}

fn tidy(text: &str) -> String {
    let mut out = WHITESPACE.replace_all(text, " ").into_owned();
    out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1").into_owned();
    for _ in 0..3 {
        out = STACKED_PUNCT.replace_all(&out, "$1").into_owned();
    }
    let out = out
        .trim()
        .trim_start_matches([',', '.', ';', ':', '!', '?', ' ', '-'])
        .trim_end_matches([',', ';', ':', ' ', '-'])
        .trim();
    let mut chars = out.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A candidate that passed compliance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompliantComment {
    pub text: String,
    pub candidate_index: usize,
    pub rewritten: bool,
    /// Why earlier candidates were rejected.
    pub rejected: Vec<String>,
}

/// Pick the first candidate that passes, directly or after one rewrite.
pub fn select_compliant(
    candidates: &[String],
    rules: &ComplianceRules,
) -> Result<CompliantComment, EngineError> {
    let mut rejected = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let violations = rules.check(candidate);
        if violations.is_empty() {
            return Ok(CompliantComment {
                text: candidate.trim().to_string(),
                candidate_index: i,
                rewritten: false,
                rejected,
            });
        }
        let rewritten = rules.rewrite(candidate);
        let remaining = rules.check(&rewritten);
        if remaining.is_empty() {
            return Ok(CompliantComment {
                text: rewritten,
                candidate_index: i,
                rewritten: true,
                rejected,
            });
        }
        let reasons: Vec<String> = remaining.iter().map(ToString::to_string).collect();
        rejected.push(format!("candidate {}: {}", i + 1, reasons.join(", ")));
    }
    if rejected.is_empty() {
        rejected.push("no candidates drafted".into());
    }
    Err(EngineError::ContentPolicyViolation { reasons: rejected })
}

// ── Pipeline ────────────────────────────────────────────────────

/// Inputs known at dispatch time.
#[derive(Debug, Clone)]
pub struct CommentContext {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub surface: Surface,
    pub post_content: String,
    pub page_tags: Vec<String>,
}

pub struct CommentPipeline {
    drafter: Arc<dyn CommentDrafter>,
    store: Arc<dyn Store>,
    max_candidates: usize,
    max_sentences: usize,
}

impl CommentPipeline {
    pub fn new(
        drafter: Arc<dyn CommentDrafter>,
        store: Arc<dyn Store>,
        config: &CommentsConfig,
    ) -> Self {
        CommentPipeline {
            drafter,
            store,
            max_candidates: config.max_candidates.clamp(1, 3),
            max_sentences: config.max_sentences.max(1),
        }
    }

    /// Draft and compliance-check a comment.
    ///
    /// Drafter and store failures surface as `TransientNetwork` so the action
    /// is retried; exhausted candidates surface as `ContentPolicyViolation`.
    pub async fn produce(&self, ctx: &CommentContext) -> Result<CompliantComment, EngineError> {
        let transient = |e: anyhow::Error| EngineError::TransientNetwork(e.to_string());
        let voice = self.store.voice_profile(ctx.user_id).await.map_err(transient)?;
        let phrases: Vec<String> = self
            .store
            .avoid_phrases(ctx.org_id)
            .await
            .map_err(transient)?
            .into_iter()
            .map(|p| p.phrase)
            .collect();

        let request = DraftRequest {
            surface: ctx.surface,
            post_content: ctx.post_content.clone(),
            voice,
            page_tags: ctx.page_tags.clone(),
            avoid_phrases: phrases.clone(),
            max_candidates: self.max_candidates,
        };
        let mut candidates = self.drafter.draft(&request).await.map_err(transient)?;
        candidates.truncate(self.max_candidates);

        let rules = ComplianceRules::new(&phrases, self.max_sentences);
        let chosen = select_compliant(&candidates, &rules)?;
        if chosen.rewritten || chosen.candidate_index > 0 {
            info!(
                user_id = %ctx.user_id,
                candidate = chosen.candidate_index,
                rewritten = chosen.rewritten,
                "Comment adjusted by compliance"
            );
        }
        Ok(chosen)
    }
}
