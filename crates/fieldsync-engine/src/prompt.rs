//! Operator interaction.
//!
//! The engine asks for free text and confirmations through [`Prompter`],
//! so every operation also runs unattended with [`AlwaysConfirm`].

use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum number of suggestions offered for a name.
pub const MAX_SUGGESTIONS: usize = 10;

/// Minimum similarity for a name to be suggested.
pub const SUGGESTION_CUTOFF: f64 = 0.1;

/// Rank `known` names by similarity to `candidate`, best first.
pub fn rank_matches(candidate: &str, known: &[String], n: usize, cutoff: f64) -> Vec<String> {
    let needle = candidate.to_lowercase();
    let mut scored: Vec<(&String, f64)> = known
        .iter()
        .map(|name| (name, strsim::jaro_winkler(&needle, &name.to_lowercase())))
        .filter(|(_, score)| *score >= cutoff)
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.into_iter().take(n).map(|(name, _)| name.clone()).collect()
}

pub trait Prompter {
    /// Ranked names from `known` the operator probably meant.
    fn suggest(&self, candidate: &str, known: &[String]) -> Vec<String> {
        rank_matches(candidate, known, MAX_SUGGESTIONS, SUGGESTION_CUTOFF)
    }

    /// Ask a yes/no question.
    fn confirm(&self, prompt: &str) -> bool;

    /// Ask for free text. `None` when the operator gives up.
    fn ask(&self, prompt: &str) -> Option<String>;
}

/// Accepts every confirmation and never supplies text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Prompter for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }

    fn ask(&self, _prompt: &str) -> Option<String> {
        None
    }
}

/// Replays prepared answers in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    confirmations: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Answers for `confirm`; once exhausted, confirmations are accepted.
    pub fn with_confirmations(self, confirmations: impl IntoIterator<Item = bool>) -> Self {
        if let Ok(mut queue) = self.confirmations.lock() {
            queue.extend(confirmations);
        }
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str) -> bool {
        self.record(prompt);
        self.confirmations
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(true)
    }

    fn ask(&self, prompt: &str) -> Option<String> {
        self.record(prompt);
        self.answers.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_matches_orders_by_similarity() {
        let known = names(&["stage y", "stage x", "slit top", "zzzz"]);
        let ranked = rank_matches("stage x", &known, 10, 0.5);
        assert_eq!(ranked[0], "stage x");
        assert_eq!(ranked[1], "stage y");
        assert!(!ranked.contains(&"zzzz".to_string()));
    }

    #[test]
    fn test_rank_matches_limit() {
        let known: Vec<String> = (0..20).map(|i| format!("mirror {}", i)).collect();
        assert_eq!(rank_matches("mirror", &known, 10, 0.1).len(), 10);
        assert!(rank_matches("mirror", &[], 10, 0.1).is_empty());
    }

    #[test]
    fn test_scripted_prompter() {
        let prompter = ScriptedPrompter::new(["first"]).with_confirmations([false]);
        assert_eq!(prompter.ask("name?").as_deref(), Some("first"));
        assert_eq!(prompter.ask("name?"), None);
        assert!(!prompter.confirm("sure?"));
        assert!(prompter.confirm("sure?"));
        assert_eq!(prompter.prompts().len(), 4);
    }

    #[test]
    fn test_always_confirm() {
        assert!(AlwaysConfirm.confirm("apply?"));
        assert_eq!(AlwaysConfirm.ask("name?"), None);
    }
}
