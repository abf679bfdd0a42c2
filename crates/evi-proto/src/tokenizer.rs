//! Splits a decoded payload into arguments.
//!
//! Whitespace separates tokens. A token starting with `'` or `"` runs to
//! the matching quote and may contain whitespace; the quotes are dropped.
//! A quote that is never closed takes the rest of the payload. Quote
//! characters inside an unquoted token are kept literally.

/// Maximum number of arguments returned for one payload.
pub const MAX_ARGS: usize = 20;

/// Tokenize `payload` into at most [`MAX_ARGS`] owned strings.
pub fn tokenize(payload: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = payload.chars().peekable();

    while args.len() < MAX_ARGS {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(first) = chars.next() else {
            break;
        };

        let token: String = if first == '"' || first == '\'' {
            chars.by_ref().take_while(|&c| c != first).collect()
        } else {
            let mut token = String::from(first);
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
            token
        };
        args.push(token);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_arguments() {
        assert_eq!(
            tokenize(r#"V 0 "hello world" 'foo'"#),
            vec!["V", "0", "hello world", "foo"]
        );
    }

    #[test]
    fn test_measure_reply() {
        assert_eq!(
            tokenize("M 12.5 1800.25 120 0 0 0"),
            vec!["M", "12.5", "1800.25", "120", "0", "0", "0"]
        );
    }

    #[test]
    fn test_whitespace_runs_and_tabs() {
        assert_eq!(tokenize("  E \t 11  "), vec!["E", "11"]);
    }

    #[test]
    fn test_empty_payload() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_unterminated_quote_takes_rest() {
        assert_eq!(tokenize(r#"Q "open ended line"#), vec!["Q", "open ended line"]);
    }

    #[test]
    fn test_empty_quoted_token() {
        assert_eq!(tokenize(r#"V "" x"#), vec!["V", "", "x"]);
    }

    #[test]
    fn test_other_quote_inside_quoted_token() {
        assert_eq!(tokenize(r#"Q "it's""#), vec!["Q", "it's"]);
    }

    #[test]
    fn test_argument_cap() {
        let payload = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let args = tokenize(&payload);
        assert_eq!(args.len(), MAX_ARGS);
        assert_eq!(args.last().map(String::as_str), Some("19"));
    }
}
