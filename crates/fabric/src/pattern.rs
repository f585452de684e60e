//! Key glob matching for `del_pattern`.
//!
//! Supports the subset of Redis KEYS globbing the key namespace uses:
//! `*` matches any run of characters (including none), everything else
//! matches literally.

/// Check whether a key matches a glob pattern.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    match_from(&p, &k)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    let mut pi = 0;
    let mut ki = 0;
    // Position of the last `*` seen, for backtracking.
    let mut star: Option<(usize, usize)> = None;

    while ki < key.len() {
        if pi < pattern.len() && pattern[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == key[ki] {
            pi += 1;
            ki += 1;
        } else if let Some((spi, ski)) = star {
            // Let the previous `*` absorb one more character.
            pi = spi + 1;
            ki = ski + 1;
            star = Some((spi, ski + 1));
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(glob_match("train:position:12952", "train:position:12952"));
        assert!(!glob_match("train:position:12952", "train:position:12951"));
        assert!(!glob_match("train:position:12952", "train:position:129521"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match("train:position:*", "train:position:12952"));
        assert!(glob_match("train:*", "train:position:12952"));
        assert!(glob_match("widget:*:8642317590", "widget:pnr:8642317590"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn star_matches_empty_run() {
        assert!(glob_match("train:position:*", "train:position:"));
    }

    #[test]
    fn prefix_alone_does_not_match() {
        assert!(!glob_match("train:position:*", "train:info:12952"));
        assert!(!glob_match("station:*", "train:position:12952"));
    }
}
