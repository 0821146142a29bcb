use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi escape pattern")
});

const QUESTION_WINDOW: usize = 5;
const QUESTION_MIN_LEN: usize = 10;

/// 去掉 ANSI 转义序列
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// 在最后 5 个非空行中找澄清问题：含 `?` 且去空白后长度大于 10，取最后一个
pub fn detect_question(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .take(QUESTION_WINDOW)
        .find(|line| line.contains('?') && line.chars().count() > QUESTION_MIN_LEN)
        .map(str::to_string)
}

/// 按字符取末尾，不会切断 UTF-8
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// 按字符取开头
pub fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m done"), "ok done");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_detect_question_takes_last_match() {
        let text = "Done editing.\nShould I also update docs?\nAnd should I proceed with deleting the file?\n";
        assert_eq!(
            detect_question(text).as_deref(),
            Some("And should I proceed with deleting the file?")
        );
    }

    #[test]
    fn test_detect_question_ignores_short_and_old_lines() {
        assert_eq!(detect_question("ok?\nWhy?"), None);
        let old = "Is this an early question?\n1\n2\n3\n4\n5";
        assert_eq!(detect_question(old), None);
        assert_eq!(detect_question(""), None);
    }

    #[test]
    fn test_detect_question_skips_blank_lines() {
        let text = "Should I proceed with deleting the file?\n\nLine a\n\n\n\nok";
        assert_eq!(
            detect_question(text).as_deref(),
            Some("Should I proceed with deleting the file?")
        );
        let old = "Is this an early question?\n\n1\n\n2\n3\n\n4\n5\n";
        assert_eq!(detect_question(old), None);
    }

    #[test]
    fn test_char_safe_slicing() {
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abc", 0), "");
        assert_eq!(head_chars("naïve text", 5), "naïve");
        assert_eq!(head_chars("ab", 5), "ab");
    }
}
