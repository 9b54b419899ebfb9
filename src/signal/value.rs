use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};

// A minus sign only counts when it does not follow a word character,
// so "Table-3" reads as 3.
static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\B-)?\d+(?:\.\d+)?").expect("static regex is valid"));

/// The single scalar being watched, e.g. a pending-order count.
///
/// Serialized with its variant so a stored `Text("3")` stays text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignalValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Number(n) => write!(f, "{}", n),
            SignalValue::Text(s) => f.write_str(s),
        }
    }
}

/// Turns raw page or payload text into a signal. `None` means "no signal".
pub type SignalParser = Arc<dyn Fn(&str) -> Option<SignalValue> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// First numeric substring, else the trimmed text.
    #[default]
    FirstNumber,
    /// First numeric substring, else no signal.
    NumberOnly,
    /// Trimmed text as-is.
    Text,
}

impl ParserKind {
    pub fn parser(self) -> SignalParser {
        match self {
            ParserKind::FirstNumber => Arc::new(parse_first_number),
            ParserKind::NumberOnly => Arc::new(|raw: &str| match parse_first_number(raw) {
                Some(SignalValue::Number(n)) => Some(SignalValue::Number(n)),
                _ => None,
            }),
            ParserKind::Text => Arc::new(|raw: &str| {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| SignalValue::Text(trimmed.to_string()))
            }),
        }
    }
}

pub fn parse_first_number(raw: &str) -> Option<SignalValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    FIRST_NUMBER
        .find(trimmed)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(SignalValue::Number)
        .or_else(|| Some(SignalValue::Text(trimmed.to_string())))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Reload only when a numeric signal goes up.
    #[default]
    Increase,
    /// Reload on any difference.
    AnyChange,
}

impl CompareMode {
    /// Whether moving from `baseline` to `current` should reload the page.
    ///
    /// Text has no ordering, so in `Increase` mode any text difference
    /// qualifies.
    pub fn should_reload(self, baseline: &SignalValue, current: &SignalValue) -> bool {
        match (self, baseline, current) {
            (CompareMode::Increase, SignalValue::Number(old), SignalValue::Number(new)) => {
                new > old
            }
            _ => baseline != current,
        }
    }
}
