use serde::{Deserialize, Serialize};
use surprisebot_config::CandidateRef;

/// A `(provider, model)` pair considered during failover (Glossary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn cooldown_key(&self) -> String {
        surprisebot_types::cooldown_key(&self.provider, &self.model)
    }
}

impl From<&CandidateRef> for Candidate {
    fn from(r: &CandidateRef) -> Self {
        Self::new(r.provider.clone(), r.model.clone())
    }
}

/// Builds the ordered, deduplicated candidate list (§4.2):
/// 1. seed with the requested pair, or the default when the request left
///    provider/model blank;
/// 2. append each configured fallback in order, dropping entries outside
///    the allow-list when one is configured;
/// 3. if no explicit override was requested, append the configured
///    default last (deduplicated);
/// 4. filter out any CLI candidate with an unexpired cool-down — unless
///    that filter would leave the list empty, in which case the
///    unfiltered list is returned (the cool-down is advisory only when
///    nothing else is available).
pub fn build_candidates(
    requested: Option<&Candidate>,
    default: &Candidate,
    fallbacks: &[Candidate],
    allow_list: Option<&[Candidate]>,
    is_cli_provider: impl Fn(&str) -> bool,
    is_cooled_down: impl Fn(&Candidate) -> bool,
) -> Vec<Candidate> {
    let mut ordered: Vec<Candidate> = Vec::new();
    let had_explicit_override = requested.is_some();
    let seed = requested.cloned().unwrap_or_else(|| default.clone());
    push_dedup(&mut ordered, seed);

    for fallback in fallbacks {
        if let Some(allow) = allow_list {
            if !allow.contains(fallback) {
                continue;
            }
        }
        push_dedup(&mut ordered, fallback.clone());
    }

    if !had_explicit_override {
        push_dedup(&mut ordered, default.clone());
    }

    let filtered: Vec<Candidate> = ordered
        .iter()
        .filter(|c| !(is_cli_provider(&c.provider) && is_cooled_down(c)))
        .cloned()
        .collect();

    if filtered.is_empty() {
        ordered
    } else {
        filtered
    }
}

fn push_dedup(list: &mut Vec<Candidate>, candidate: Candidate) {
    if !list.contains(&candidate) {
        list.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(p: &str, m: &str) -> Candidate {
        Candidate::new(p, m)
    }

    #[test]
    fn first_element_is_requested_pair() {
        let requested = cand("anthropic", "opus");
        let default = cand("anthropic", "sonnet");
        let candidates = build_candidates(Some(&requested), &default, &[], None, |_| false, |_| false);
        assert_eq!(candidates[0], requested);
    }

    #[test]
    fn first_element_is_default_when_no_request() {
        let default = cand("anthropic", "sonnet");
        let candidates = build_candidates(None, &default, &[], None, |_| false, |_| false);
        assert_eq!(candidates[0], default);
    }

    #[test]
    fn no_duplicate_provider_model_pairs() {
        let requested = cand("anthropic", "opus");
        let default = cand("anthropic", "opus");
        let fallbacks = vec![cand("anthropic", "opus"), cand("openai", "gpt4")];
        let candidates = build_candidates(Some(&requested), &default, &fallbacks, None, |_| false, |_| false);
        let mut seen = std::collections::HashSet::new();
        for c in &candidates {
            assert!(seen.insert(c.clone()), "duplicate candidate {:?}", c);
        }
    }

    #[test]
    fn allow_list_filters_non_primary_fallbacks() {
        let requested = cand("anthropic", "opus");
        let default = cand("anthropic", "sonnet");
        let fallbacks = vec![cand("openai", "gpt4"), cand("google", "gemini")];
        let allow_list = vec![cand("openai", "gpt4")];
        let candidates = build_candidates(
            Some(&requested),
            &default,
            &fallbacks,
            Some(&allow_list),
            |_| false,
            |_| false,
        );
        assert!(candidates[1..].iter().all(|c| allow_list.contains(c)));
        assert!(!candidates.contains(&cand("google", "gemini")));
    }

    #[test]
    fn cooldowns_leaving_list_empty_return_unfiltered() {
        let requested = cand("cli-provider", "model-a");
        let default = cand("cli-provider", "model-a");
        let candidates = build_candidates(
            Some(&requested),
            &default,
            &[],
            None,
            |provider| provider == "cli-provider",
            |_| true,
        );
        assert_eq!(candidates, vec![requested]);
    }

    #[test]
    fn cooldowns_filter_out_cooled_down_cli_candidates_when_others_remain() {
        let requested = cand("cli-provider", "model-a");
        let default = cand("cli-provider", "model-a");
        let fallbacks = vec![cand("embedded-provider", "model-b")];
        let candidates = build_candidates(
            Some(&requested),
            &default,
            &fallbacks,
            None,
            |provider| provider == "cli-provider",
            |c| c.provider == "cli-provider",
        );
        assert_eq!(candidates, vec![cand("embedded-provider", "model-b")]);
    }
}
