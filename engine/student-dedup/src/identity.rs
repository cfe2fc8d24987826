//! Identity keys used to decide whether two students are the same person

/// Digits-only national ID, or `None` when it has fewer than `min_digits` digits
pub fn normalize_national_id(raw: Option<&str>, min_digits: usize) -> Option<String> {
    let digits: String = raw?.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= min_digits {
        Some(digits)
    } else {
        None
    }
}

/// Case-folded, trimmed display name
pub fn normalize_name(full_name: &str) -> String {
    full_name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Whether a name carries one of the test-data markers (case-insensitive)
pub fn is_test_name(full_name: &str, markers: &[String]) -> bool {
    let name = normalize_name(full_name);
    markers.iter().any(|marker| !marker.is_empty() && name.contains(&marker.to_lowercase()))
}

/// Render an 11-digit CPF as `000.000.000-00`; anything else is returned as is
pub fn format_national_id(digits: &str) -> String {
    if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.to_string();
    }
    format!("{}.{}.{}-{}", &digits[0..3], &digits[3..6], &digits[6..9], &digits[9..11])
}
