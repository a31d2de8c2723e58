//! Percentage extraction from update output.

use regex::Regex;
use std::sync::OnceLock;

fn percent_re() -> &'static Regex {
    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    PERCENT_RE.get_or_init(|| Regex::new(r"(\d+)%").expect("valid percent regex"))
}

/// Last `<digits>%` in `text` that is a valid percentage.
pub fn last_percent(text: &str) -> Option<u8> {
    percent_re()
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|value| *value <= 100)
        .last()
        .map(|value| value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_match_wins() {
        assert_eq!(last_percent("progress 10%"), Some(10));
        assert_eq!(last_percent("10% ... 55%\r"), Some(55));
        assert_eq!(last_percent("[#####     ] 50% (12.0 MB/s) eta 3s"), Some(50));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(last_percent("downloading image"), None);
        assert_eq!(last_percent("% done"), None);
        assert_eq!(last_percent(""), None);
    }

    #[test]
    fn test_out_of_range_values_are_skipped() {
        assert_eq!(last_percent("40% then 250%"), Some(40));
        assert_eq!(last_percent("99999999999%"), None);
        assert_eq!(last_percent("100%"), Some(100));
        assert_eq!(last_percent("0%"), Some(0));
    }
}
