//! Conversation compaction and context-limit recovery.
//!
//! When a session's accumulated context exceeds a configured token
//! threshold, the harness finds the user-turn boundary nearest a target
//! token count — but never past the last user turn — summarizes the
//! prefix, and replaces it with a single synthetic "summary" turn.
//! Subsequent compactions prepend the previous summary as a fake-but-unmarked
//! turn so the summarizer treats it as ordinary conversational context (the
//! "progressive summarization trick"); [`crate::task_context::CompactionState`]
//! tracks that text across calls on the owning task context.

use async_trait::async_trait;

use crate::error::A2AResult;
use crate::types::Role;

/// Rough per-token character budget used to estimate text token counts
/// without a real tokenizer. Good enough for threshold comparisons, not
/// billing.
const CHARS_PER_TOKEN: u64 = 4;

/// Flat token cost attributed to a single inline image.
const TOKENS_PER_IMAGE: u64 = 512;

/// Token cost per second of inline video.
const TOKENS_PER_VIDEO_SECOND: u64 = 20;

/// One turn of accumulated session context, abstracted away from whatever
/// wire message produced it. Audio content is deliberately not represented
/// here — audio is skipped when counting tokens.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub image_count: usize,
    pub video_seconds: u32,
    /// True for a turn synthesized by a previous compaction.
    pub is_summary: bool,
}

impl ConversationTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_count: 0,
            video_seconds: 0,
            is_summary: false,
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            image_count: 0,
            video_seconds: 0,
            is_summary: false,
        }
    }

    /// A synthetic summary turn. Stored unmarked in the visible `role`/`text`
    /// so downstream summarizers treat it as ordinary context — only
    /// `is_summary` records its provenance for our own bookkeeping.
    fn summary(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_count: 0,
            video_seconds: 0,
            is_summary: true,
        }
    }
}

/// Estimated token cost of a single turn.
pub fn estimate_tokens(turn: &ConversationTurn) -> u64 {
    let text_tokens = (turn.text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN);
    let image_tokens = turn.image_count as u64 * TOKENS_PER_IMAGE;
    let video_tokens = turn.video_seconds as u64 * TOKENS_PER_VIDEO_SECOND;
    text_tokens + image_tokens + video_tokens
}

/// Total estimated token cost across every turn.
pub fn total_tokens(turns: &[ConversationTurn]) -> u64 {
    turns.iter().map(estimate_tokens).sum()
}

/// Index of the last turn that starts a user turn, if any.
fn last_user_turn_index(turns: &[ConversationTurn]) -> Option<usize> {
    turns.iter().rposition(|t| t.role == Role::User)
}

/// Chooses the cutoff index nearest `target_tokens` worth of trailing
/// context, constrained to never reach or pass the last user-turn boundary
/// (: compaction never removes the last user turn). Turns `[0..cutoff)`
/// are summarized; `[cutoff..]` are kept verbatim.
///
/// Returns `0` (no-op) when there is no user-turn boundary strictly before
/// the last one to cut at.
pub fn compaction_cutoff(turns: &[ConversationTurn], target_tokens: u64) -> usize {
    let Some(last_user) = last_user_turn_index(turns) else {
        return 0;
    };

    let candidates: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(i, t)| *i < last_user && t.role == Role::User)
        .map(|(i, _)| i)
        .collect();

    if candidates.is_empty() {
        return 0;
    }

    candidates
        .into_iter()
        .min_by_key(|&cutoff| {
            let kept = total_tokens(&turns[cutoff..]);
            kept.abs_diff(target_tokens)
        })
        .unwrap_or(0)
}

/// Produces the replacement text a compaction's synthetic summary turn
/// carries, folding in the previous summary (if any) as ordinary context —
/// the progressive-summarization trick.
fn summarizer_input(turns: &[ConversationTurn], previous_summary: Option<&str>) -> String {
    let mut input = String::new();
    if let Some(prev) = previous_summary {
        input.push_str(prev);
        input.push_str("\n\n");
    }
    for turn in turns {
        input.push_str(&format!("{}: {}\n", turn.role, turn.text));
    }
    input
}

/// Produces a summary of conversational text. The harness's real
/// implementation calls the configured LLM backend; tests use a
/// deterministic stub.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> A2AResult<String>;
}

/// Outcome of a compaction attempt.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub turns: Vec<ConversationTurn>,
    pub summary_text: String,
}

/// Runs one compaction pass if `total_tokens(turns)` exceeds `threshold`.
/// Returns `None` if compaction was not needed or no eligible cutoff exists
/// (e.g. the session has only ever had one user turn).
///
/// Idempotent per session in the sense that repeated calls with an
/// unchanged `turns`/`previous_summary` pair produce the same cutoff and
/// summary input every time — the harness is responsible for only invoking
/// this once per accumulation past the threshold.
pub async fn compact_if_needed(
    turns: &[ConversationTurn],
    threshold_tokens: u64,
    target_tokens: u64,
    previous_summary: Option<&str>,
    summarizer: &dyn Summarizer,
) -> A2AResult<Option<CompactionOutcome>> {
    if total_tokens(turns) <= threshold_tokens {
        return Ok(None);
    }

    let cutoff = compaction_cutoff(turns, target_tokens);
    if cutoff == 0 {
        return Ok(None);
    }

    let input = summarizer_input(&turns[..cutoff], previous_summary);
    let summary_text = summarizer.summarize(&input).await?;

    let mut new_turns = vec![ConversationTurn::summary(summary_text.clone())];
    new_turns.extend_from_slice(&turns[cutoff..]);

    Ok(Some(CompactionOutcome {
        turns: new_turns,
        summary_text,
    }))
}

/// Whether a `BadRequestError` message matches a known context-limit
/// fingerprint — see [`crate::error::A2AError::is_context_limit_text`].
pub fn is_context_limit_error(message: &str) -> bool {
    crate::error::A2AError::is_context_limit_text(message)
}

/// What to do with a `BadRequestError` surfaced by the LLM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestDisposition {
    /// Recognized as a context-limit error: compact emergently and retry.
    EmergencyCompactAndRetry,
    /// Any other `BadRequestError`: surface to the client unchanged.
    Surface,
}

pub fn classify_bad_request(message: &str) -> BadRequestDisposition {
    if is_context_limit_error(message) {
        BadRequestDisposition::EmergencyCompactAndRetry
    } else {
        BadRequestDisposition::Surface
    }
}

/// User-visible truncation notice, worded differently for interactive vs.
/// background tasks. Background-ness is `TaskContext::is_background`.
pub fn truncation_notice(is_background: bool) -> &'static str {
    if is_background {
        "ℹ️ Note: conversation history was automatically summarized to stay within the model's context window."
    } else {
        "ℹ️ Your conversation history reached the limit and was automatically summarized to keep the conversation going."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, text: &str) -> A2AResult<String> {
            Ok(format!("summary of {} chars", text.len()))
        }
    }

    fn turns_with_user_boundaries(n_pairs: usize, text_len: usize) -> Vec<ConversationTurn> {
        let mut turns = Vec::new();
        let filler = "x".repeat(text_len);
        for _ in 0..n_pairs {
            turns.push(ConversationTurn::user_text(filler.clone()));
            turns.push(ConversationTurn::agent_text(filler.clone()));
        }
        turns
    }

    #[test]
    fn cutoff_never_reaches_last_user_turn() {
        let turns = turns_with_user_boundaries(5, 400);
        let last_user = last_user_turn_index(&turns).unwrap();
        for target in [0, 100, 1000, 10_000] {
            let cutoff = compaction_cutoff(&turns, target);
            assert!(cutoff < last_user, "cutoff {cutoff} must be < {last_user}");
        }
    }

    #[test]
    fn single_user_turn_has_no_eligible_cutoff() {
        let turns = vec![ConversationTurn::user_text("hi")];
        assert_eq!(compaction_cutoff(&turns, 0), 0);
    }

    #[test]
    fn cutoff_picks_boundary_nearest_target_tokens() {
        // 10 pairs, each turn ~100 tokens (400 chars / 4).
        let turns = turns_with_user_boundaries(10, 400);
        let cutoff = compaction_cutoff(&turns, 200); // roughly 1 pair's worth
        let kept_tokens = total_tokens(&turns[cutoff..]);
        // Some other boundary should not have done meaningfully better.
        assert!(kept_tokens > 0);
        assert!(cutoff > 0);
    }

    #[tokio::test]
    async fn compaction_skipped_below_threshold() {
        let turns = turns_with_user_boundaries(2, 10);
        let result = compact_if_needed(&turns, 1_000_000, 0, None, &StubSummarizer)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn compaction_replaces_prefix_with_single_summary_turn() {
        let turns = turns_with_user_boundaries(10, 400);
        let before_tokens = total_tokens(&turns);
        let result = compact_if_needed(&turns, 100, 50, None, &StubSummarizer)
            .await
            .unwrap()
            .expect("should compact");
        assert!(result.turns[0].is_summary);
        assert!(total_tokens(&result.turns) < before_tokens);
        // Never drops the last user turn.
        assert!(last_user_turn_index(&result.turns).is_some());
    }

    #[tokio::test]
    async fn progressive_summarization_folds_in_previous_summary() {
        let turns = turns_with_user_boundaries(10, 400);
        let first = compact_if_needed(&turns, 100, 50, None, &StubSummarizer)
            .await
            .unwrap()
            .unwrap();

        // Simulate another round of accumulation, then compact again with
        // the previous summary text threaded through.
        let mut more_turns = first.turns.clone();
        more_turns.extend(turns_with_user_boundaries(10, 400));
        let second = compact_if_needed(&more_turns, 100, 50, Some(&first.summary_text), &StubSummarizer)
            .await
            .unwrap()
            .unwrap();

        assert!(second.turns[0].is_summary);
    }

    #[test]
    fn context_limit_phrases_recognized_case_insensitively() {
        assert!(is_context_limit_error("Maximum Context Length exceeded"));
        assert!(is_context_limit_error("the PROMPT IS TOO LONG for this model"));
        assert!(!is_context_limit_error("invalid api key"));
    }

    #[test]
    fn classify_bad_request_routes_on_fingerprint() {
        assert_eq!(
            classify_bad_request("token limit reached"),
            BadRequestDisposition::EmergencyCompactAndRetry
        );
        assert_eq!(
            classify_bad_request("malformed tool call"),
            BadRequestDisposition::Surface
        );
    }

    #[test]
    fn truncation_notice_differs_for_background() {
        assert!(truncation_notice(false).starts_with("ℹ️ Your conversation"));
        assert!(truncation_notice(true).starts_with("ℹ️ Note:"));
    }
}
