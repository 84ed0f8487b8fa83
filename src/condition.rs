//! Edge guards evaluated against a parent's captured output.

/// Reserved condition value for fallback children.
pub const ELSE: &str = "else";

const CONTAINS_PREFIX: &str = "contains:";

/// Parsed form of an edge condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `contains:kw1|kw2`: any keyword equals a whitespace token of the output.
    Contains(Vec<String>),
    /// `else`: decided by the scheduler's fallback pass, never here.
    Else,
    /// Any other literal. Always passes.
    Always(String),
}

impl Condition {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == ELSE {
            return Condition::Else;
        }
        match raw.strip_prefix(CONTAINS_PREFIX) {
            Some(list) => Condition::Contains(
                list.split('|')
                    .map(|kw| kw.trim().to_lowercase())
                    .filter(|kw| !kw.is_empty())
                    .collect(),
            ),
            None => Condition::Always(raw.to_string()),
        }
    }

    pub fn is_else(&self) -> bool {
        matches!(self, Condition::Else)
    }

    pub fn matches(&self, output: &str) -> bool {
        match self {
            Condition::Contains(keywords) => {
                let normalized = normalize_output(output);
                normalized
                    .split_whitespace()
                    .any(|word| keywords.iter().any(|kw| kw == word))
            }
            Condition::Else => false,
            Condition::Always(_) => true,
        }
    }
}

/// Returns true if `condition` admits a child whose parent produced `output`.
pub fn evaluate_condition(output: &str, condition: &str) -> bool {
    Condition::parse(condition).matches(output)
}

pub fn is_else(condition: &str) -> bool {
    condition.trim() == ELSE
}

/// Lower-case, trim, and drop any `"<op> =>"` prefix left by trace formatting.
fn normalize_output(output: &str) -> String {
    let lowered = output.trim().to_lowercase();
    match lowered.find("=>") {
        Some(idx) => lowered[idx + 2..].trim().to_string(),
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_any_listed_keyword_as_a_whole_token() {
        assert!(evaluate_condition("op => heads", "contains:heads|tails"));
        assert!(evaluate_condition("it landed on TAILS", "contains:heads|tails"));
        assert!(!evaluate_condition("op => edge", "contains:heads|tails"));
    }

    #[test]
    fn contains_is_token_equality_not_substring() {
        assert!(!evaluate_condition("headstrong", "contains:heads"));
        assert!(!evaluate_condition("heads.", "contains:heads"));
    }

    #[test]
    fn contains_keywords_are_trimmed_and_case_folded() {
        assert!(evaluate_condition("yes", "contains: YES | no "));
    }

    #[test]
    fn trace_prefix_is_stripped_only_up_to_first_arrow() {
        assert!(evaluate_condition("llm://m:q => a => b", "contains:a"));
        assert!(!evaluate_condition("llm://m:q => a => b", "contains:q"));
    }

    #[test]
    fn empty_keywords_never_match() {
        assert!(!evaluate_condition("", "contains:"));
        assert!(!evaluate_condition("anything", "contains:|"));
    }

    #[test]
    fn else_is_not_evaluated_here() {
        assert!(Condition::parse(" else ").is_else());
        assert!(!evaluate_condition("whatever", "else"));
    }

    #[test]
    fn unknown_guards_always_pass() {
        assert!(evaluate_condition("", "equals:foo"));
        assert_eq!(
            Condition::parse("weird"),
            Condition::Always("weird".to_string())
        );
    }
}
