//! Fuzzy product and category name matching.

/// Lowercases and drops every character outside `[a-z0-9]`.
///
/// Two names refer to the same thing when their normalized forms are equal:
/// `"Parle-G 100g"` and `"parle g 100G"` both become `"parleg100g"`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}
