use once_cell::sync::Lazy;
use regex::Regex;

/// A rule that tries to pull an analysis suffix off the end of a label
pub trait SuffixRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// The suffix this rule recognizes, if the label matches
    fn extract(&self, label: &str) -> Option<String>;
}

/// Regex-backed rule returning its first capture group
pub struct PatternRule {
    name: &'static str,
    pattern: &'static Lazy<Regex>,
}

impl SuffixRule for PatternRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, label: &str) -> Option<String> {
        self.pattern
            .captures(label)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

static SPOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[.:_\s-](Spot.+)$").expect("spot regex"));
static TRAILING_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.:_\s-](\w+)$").expect("trailing word regex"));
static TRAILING_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.:_\s-](\d+)$").expect("trailing digits regex"));

/// `ALC-14 Spot 12` → `Spot 12`
pub static SPOT_RULE: PatternRule = PatternRule {
    name: "spot",
    pattern: &SPOT,
};

/// `ALC-14 b07` → `b07`
pub static TRAILING_WORD_RULE: PatternRule = PatternRule {
    name: "trailing_word",
    pattern: &TRAILING_WORD,
};

/// `Sample1.7` → `7`
pub static TRAILING_DIGITS_RULE: PatternRule = PatternRule {
    name: "trailing_digits",
    pattern: &TRAILING_DIGITS,
};

/// Ordered rule cascade; the first rule that matches wins
pub struct SuffixRules {
    rules: Vec<&'static dyn SuffixRule>,
}

impl Default for SuffixRules {
    fn default() -> Self {
        Self {
            rules: vec![
                &SPOT_RULE as &'static dyn SuffixRule,
                &TRAILING_WORD_RULE,
                &TRAILING_DIGITS_RULE,
            ],
        }
    }
}

impl SuffixRules {
    pub fn new(rules: Vec<&'static dyn SuffixRule>) -> Self {
        Self { rules }
    }

    /// First matching suffix with the name of the rule that produced it
    pub fn extract(&self, label: &str) -> Option<(&'static str, String)> {
        self.rules
            .iter()
            .find_map(|rule| rule.extract(label).map(|s| (rule.name(), s)))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}
