//! Lexical heuristics for placing labels in the concept tree

use serde::{Deserialize, Serialize};

/// Relation of one label to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generality {
    SameLevel,
    MoreSpecific,
    MoreGeneral,
}

/// Relative gap between specificity scores below which two labels tie
const TIE_RATIO: f32 = 0.15;
/// Containment adjustment when one label's text includes the other's
const CONTAINMENT_BIAS: f32 = 0.5;
/// Score beyond which a label is considered more specific/general
const DECISION_MARGIN: f32 = 0.15;

/// Relation of `a` to `b`
///
/// More (and longer) tokens read as more specific; a label that mentions the
/// other label's text is pushed towards specific, and the reverse towards
/// general.
pub fn compare_generality(a: &str, b: &str) -> Generality {
    let spec_a = specificity(a);
    let spec_b = specificity(b);

    let bias = if (spec_a - spec_b).abs() <= TIE_RATIO * spec_b.max(1.0) {
        0.0
    } else if spec_a > spec_b {
        1.0
    } else {
        -1.0
    };

    let norm_a = normalize(a);
    let norm_b = normalize(b);
    let mut containment = 0.0;
    if norm_a.contains(&norm_b) {
        containment += CONTAINMENT_BIAS;
    }
    if norm_b.contains(&norm_a) {
        containment -= CONTAINMENT_BIAS;
    }

    let score = bias + containment;
    if score > DECISION_MARGIN {
        Generality::MoreSpecific
    } else if score < -DECISION_MARGIN {
        Generality::MoreGeneral
    } else {
        Generality::SameLevel
    }
}

/// Specificity proxy: token count plus a quarter point per token of 4+ chars
pub fn specificity(text: &str) -> f32 {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let longer = tokens.iter().filter(|t| t.len() >= 4).count();
    tokens.len() as f32 + 0.25 * longer as f32
}

/// Lowercase text with every run of non-`[a-z0-9]` characters collapsed to `sep`
fn collapse(text: &str, sep: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push(sep);
            in_gap = true;
        }
    }
    out
}

/// Normalized text used for containment checks
pub fn normalize(text: &str) -> String {
    collapse(text, ' ')
}

/// Slug of `label` capped at `max_len` characters
///
/// Returns the slug and whether it had to be truncated.
pub fn slug(label: &str, max_len: usize) -> (String, bool) {
    let full = collapse(label, '_');
    let trimmed = full.trim_matches('_');
    if trimmed.len() > max_len {
        // Slug is pure ASCII, so byte slicing is char slicing
        (trimmed[..max_len].to_string(), true)
    } else {
        (trimmed.to_string(), false)
    }
}

/// Stable node id for a label: `node_<slug>`, or `node_node` when the slug is empty
pub fn node_id(label: &str, max_len: usize) -> String {
    let (slug, truncated) = slug(label, max_len);
    if truncated {
        tracing::debug!("Concept label truncated to {} chars: {}", max_len, label);
    }
    if slug.is_empty() {
        "node_node".to_string()
    } else {
        format!("node_{}", slug)
    }
}
