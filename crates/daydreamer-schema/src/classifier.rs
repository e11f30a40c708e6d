//! Deterministic semantic theme classification.
//!
//! Observations carry exactly one of nine canonical themes. Classification is
//! a fixed, ordered keyword scan with no ML dependency: the same content
//! always maps to the same theme, which keeps historical reclassification
//! reproducible. The keyword tables live here, next to the registry, so the
//! mapping is documented in one place.

/// The nine canonical themes, in evaluation order. `general` is the fallback
/// and carries no keywords.
pub const THEMES: &[&str] = &[
    "technical",
    "memory",
    "project",
    "strategic",
    "consciousness",
    "partnership",
    "temporal",
    "emotional",
    "general",
];

/// Ordered keyword groups. First matching group wins; groups are disjoint so
/// ordering only matters for content that mentions several themes at once.
pub const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "technical",
        &[
            "code",
            "coding",
            "debug",
            "refactor",
            "compil",
            "algorithm",
            "database",
            "server",
            "implementation",
            "architecture",
            "protocol",
            "endpoint",
            "bugfix",
            " bug ",
        ],
    ),
    (
        "memory",
        &[
            "memory",
            "remember",
            "recall",
            "forget",
            "observation",
            "knowledge graph",
            "embedding",
        ],
    ),
    (
        "project",
        &[
            "project",
            "milestone",
            "roadmap",
            "shipping",
            "shipped",
            "launch",
            "release",
            "deliver",
            "sprint",
        ],
    ),
    (
        "strategic",
        &[
            "strategy",
            "strategic",
            "planning",
            "long-term",
            "vision",
            "priorit",
            "decision",
            "tradeoff",
        ],
    ),
    (
        "consciousness",
        &[
            "consciousness",
            "awareness",
            "identity",
            "cognition",
            "emergence",
            "sentien",
            "introspect",
        ],
    ),
    (
        "partnership",
        &[
            "partner",
            "collaborat",
            "together",
            "trust",
            "friendship",
            "teamwork",
        ],
    ),
    (
        "temporal",
        &[
            "yesterday",
            "tomorrow",
            "schedule",
            "deadline",
            "morning",
            "evening",
            "last week",
            "next week",
            "anniversary",
        ],
    ),
    (
        "emotional",
        &[
            "feel",
            "feeling",
            "happy",
            "joy",
            "sad",
            "fear",
            "excit",
            "anxious",
            "grateful",
            "frustrat",
        ],
    ),
];

/// Map free text to one of the nine canonical themes.
pub fn classify_theme(content: &str) -> &'static str {
    let lowered = content.to_lowercase();
    for (theme, keywords) in THEME_KEYWORDS {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return theme;
        }
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Refactored the session table locking", "technical")]
    #[case("Shipping the V6 pipeline", "project")]
    #[case("We should remember this for later recall", "memory")]
    #[case("Long-term vision for the agent substrate", "strategic")]
    #[case("A moment of genuine awareness during the session", "consciousness")]
    #[case("Great collaboration on the migration", "partnership")]
    #[case("Deadline moved to next week", "temporal")]
    #[case("Feeling grateful about the progress", "emotional")]
    #[case("Lunch was fine", "general")]
    fn classification_matches_expected_theme(#[case] content: &str, #[case] expected: &str) {
        assert_eq!(classify_theme(content), expected);
    }

    #[test]
    fn classification_is_deterministic() {
        let content = "Shipping the V6 pipeline";
        let first = classify_theme(content);
        for _ in 0..100 {
            assert_eq!(classify_theme(content), first);
        }
    }

    #[test]
    fn first_matching_group_wins_for_mixed_content() {
        // Mentions both code (technical) and shipping (project); technical is
        // evaluated first.
        assert_eq!(classify_theme("shipping the new code"), "technical");
    }

    #[test]
    fn every_theme_is_canonical() {
        for (theme, _) in THEME_KEYWORDS {
            assert!(THEMES.contains(theme));
        }
        assert_eq!(THEMES.len(), 9);
    }

    #[test]
    fn fallback_is_general() {
        assert_eq!(classify_theme(""), "general");
        assert_eq!(classify_theme("xyzzy"), "general");
    }
}
