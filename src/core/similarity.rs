//! String similarity for mention-to-canonical matching.
//!
//! Both sides are normalized first (lowercase, punctuation to spaces,
//! whitespace collapsed), then scored as a weighted blend of:
//! - token-set overlap (Jaccard over lightly stemmed tokens), which rewards
//!   shared words regardless of order
//! - normalized Levenshtein over the sorted tokens, which tolerates typos
//!
//! Scores are in [0, 1] and symmetric.

const TOKEN_WEIGHT: f64 = 0.3;
const EDIT_WEIGHT: f64 = 0.7;

/// Lowercase, drop apostrophes, turn other punctuation into spaces and
/// collapse whitespace ("Big-Mek's  Warbike" -> "big meks warbike")
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip a plural "s" so "Intercessor" and "Intercessors" share a token
fn stem(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

/// Jaccard overlap of the stemmed token sets of two normalized strings
pub fn token_set_score(a: &str, b: &str) -> f64 {
    let mut left: Vec<&str> = a.split(' ').filter(|t| !t.is_empty()).map(stem).collect();
    let mut right: Vec<&str> = b.split(' ').filter(|t| !t.is_empty()).map(stem).collect();
    left.sort_unstable();
    left.dedup();
    right.sort_unstable();
    right.dedup();

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.iter().filter(|t| right.contains(t)).count();
    let union = left.len() + right.len() - shared;
    shared as f64 / union as f64
}

/// Normalized Levenshtein similarity over alphabetically sorted tokens
pub fn edit_score(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity between a mention and a candidate name, in [0, 1]
pub fn similarity(mention: &str, candidate: &str) -> f64 {
    let a = normalize(mention);
    let b = normalize(candidate);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let score = TOKEN_WEIGHT * token_set_score(&a, &b) + EDIT_WEIGHT * edit_score(&a, &b);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Big-Mek's   Warbike "), "big meks warbike");
        assert_eq!(normalize("SPACE\tMarine\nIntercessors"), "space marine intercessors");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn test_similarity_is_case_insensitive() {
        let lower = similarity("space marine intercessors", "Assault Intercessors");
        let upper = similarity("Space Marine Intercessors", "Assault Intercessors");
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        assert_eq!(
            similarity("Big Mek", "Big Mek on Warbike"),
            similarity("Big Mek on Warbike", "Big Mek")
        );
    }

    #[test]
    fn test_word_order_is_ignored() {
        assert_eq!(similarity("Squad Intercessor", "Intercessor Squad"), 1.0);
    }

    #[test]
    fn test_single_typo_lands_in_medium_band() {
        let score = similarity("Intercesors", "Intercessors");
        assert!(score > 0.55 && score < 0.85, "score was {}", score);
    }

    #[test]
    fn test_plural_is_high() {
        let score = similarity("Intercessor", "Intercessors");
        assert!(score >= 0.85, "score was {}", score);
    }

    #[test]
    fn test_partial_name_is_low() {
        let score = similarity("Big Mek", "Big Mek on Warbike");
        assert!(score < 0.55, "score was {}", score);
    }

    #[test]
    fn test_empty_input_scores_zero() {
        assert_eq!(similarity("", "Boyz"), 0.0);
        assert_eq!(similarity("...", "..."), 0.0);
    }
}
