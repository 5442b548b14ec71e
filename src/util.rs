use std::ffi::CStr;

// Insert \ before " and \
// Insert escape sequences for well-known control chars.
// Translate all other control chars to spaces (it's possible to do better).
pub fn json_quote(s: &str) -> String {
    let mut t = "".to_string();
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                t.push('\\');
                t.push(c);
            }
            '\n' => {
                t.push_str("\\n");
            }
            '\r' => {
                t.push_str("\\r");
            }
            '\t' => {
                t.push_str("\\t");
            }
            _ctl if c < ' ' => {
                t.push(' ');
            }
            _ => {
                t.push(c);
            }
        }
    }
    t
}

#[test]
pub fn json_quote_test() {
    assert!(&json_quote("abcde") == "abcde");
    assert!(&json_quote(r#"abc\de"#) == r#"abc\\de"#);
    assert!(&json_quote(r#"abc"de"#) == r#"abc\"de"#);
    assert!(&json_quote("abc\nde") == r#"abc\nde"#);
    assert!(&json_quote("abc\rde") == r#"abc\rde"#);
    assert!(&json_quote("abc	de") == r#"abc\tde"#);
    assert!(&json_quote("abc\u{0008}de") == r#"abc de"#);
}

// Copy a C string.

pub fn cstrdup(s: &[cty::c_char]) -> String {
    unsafe { CStr::from_ptr(s.as_ptr()) }
        .to_string_lossy()
        .to_string()
}

// A path component made from a writer target: anything that is not alphanumeric, '-', '_' or '.'
// becomes '_', and a leading '.' does too so that we never produce "." or "..".
pub fn path_safe(s: &str) -> String {
    let mut t = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if t.starts_with('.') {
        t.replace_range(0..1, "_");
    }
    if t == "" {
        t = "_".to_string();
    }
    t
}

#[test]
pub fn path_safe_test() {
    assert!(path_safe("events") == "events");
    assert!(path_safe("a/b c") == "a_b_c");
    assert!(path_safe("..") == "_.");
    assert!(path_safe("") == "_");
    assert!(path_safe("x.y-z_1") == "x.y-z_1");
}
