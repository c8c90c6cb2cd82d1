pub fn similarity_score(left: &str, right: &str) -> u8 {
    if left == right {
        return 100;
    }
    let ratio = strsim::normalized_levenshtein(left, right);
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}
