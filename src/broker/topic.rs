//! Topic pattern matching for exchange bindings.
//!
//! Patterns are dot-separated words where `*` matches exactly one word and
//! `#` matches zero or more words.

/// Test a binding pattern against a routing key.
pub fn pattern_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` may swallow zero or more words
            (0..=key.len()).any(|skip| match_segments(rest, &key[skip..]))
        }
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => match_segments(rest, key_rest),
            None => false,
        },
        Some((word, rest)) => match key.split_first() {
            Some((key_word, key_rest)) => word == key_word && match_segments(rest, key_rest),
            None => false,
        },
    }
}
