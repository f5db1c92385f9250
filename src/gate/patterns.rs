use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

/// Characters counted toward the excessive-special-character ratio.
const SPECIAL_CHARS: &str = "<>\"'%;()&|";
const MAX_SCAN_DEPTH: usize = 2;

static SQL_INJECTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(union|select|insert|delete|drop|update|alter)\b.*\b(from|where|into|table)\b",
        r"(?i)\bunion\b.*\bselect\b",
        r"(?i)\bor\b\s+\d+\s*=\s*\d+",
        r"(--|;|/\*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static XSS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?i)<iframe",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

pub fn looks_like_sql_injection(value: &str) -> bool {
    SQL_INJECTION.iter().any(|re| re.is_match(value))
}

pub fn looks_like_xss(value: &str) -> bool {
    XSS.iter().any(|re| re.is_match(value))
}

pub fn special_char_ratio(value: &str) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let special = value.chars().filter(|c| SPECIAL_CHARS.contains(*c)).count();
    special as f64 / value.chars().count() as f64
}

/// Scans string fields of a JSON body, recursing at most two levels deep.
/// Returns the paths of suspicious fields.
pub fn scan_payload(body: &JsonValue, max_special_ratio: f64) -> Vec<String> {
    let mut hits = Vec::new();
    scan_value(body, "$", 0, max_special_ratio, &mut hits);
    hits
}

fn scan_value(
    value: &JsonValue,
    path: &str,
    depth: usize,
    max_special_ratio: f64,
    hits: &mut Vec<String>,
) {
    match value {
        JsonValue::String(s) => {
            if looks_like_sql_injection(s)
                || looks_like_xss(s)
                || special_char_ratio(s) > max_special_ratio
            {
                hits.push(path.to_string());
            }
        }
        JsonValue::Object(map) if depth < MAX_SCAN_DEPTH => {
            for (key, child) in map {
                scan_value(child, &format!("{path}.{key}"), depth + 1, max_special_ratio, hits);
            }
        }
        JsonValue::Array(items) if depth < MAX_SCAN_DEPTH => {
            for (i, child) in items.iter().enumerate() {
                scan_value(child, &format!("{path}[{i}]"), depth + 1, max_special_ratio, hits);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_sql_injection() {
        assert!(looks_like_sql_injection("1 UNION SELECT password FROM users"));
        assert!(looks_like_sql_injection("x'; DROP TABLE users; --"));
        assert!(looks_like_sql_injection("' OR 1=1"));
        assert!(!looks_like_sql_injection("buy 100 GOLD"));
    }

    #[test]
    fn test_detects_xss() {
        assert!(looks_like_xss("<script>alert(1)</script>"));
        assert!(looks_like_xss("<img onerror=alert(1)>"));
        assert!(looks_like_xss("javascript:void(0)"));
        assert!(!looks_like_xss("plain text"));
    }

    #[test]
    fn test_special_char_ratio() {
        assert_eq!(special_char_ratio(""), 0.0);
        assert!(special_char_ratio("<<<<>>>>") > 0.9);
        assert!(special_char_ratio("hello world") < 0.01);
    }

    #[test]
    fn test_scan_payload_depth_limit() {
        let body = json!({
            "name": "<script>alert(1)</script>",
            "nested": { "field": "' OR 1=1" },
            "deep": { "a": { "b": "<script>too deep</script>" } }
        });
        let hits = scan_payload(&body, 0.2);
        assert!(hits.contains(&"$.name".to_string()));
        assert!(hits.contains(&"$.nested.field".to_string()));
        // Depth limit of 2 keeps the deepest field unscanned.
        assert!(!hits.iter().any(|h| h.contains("deep.a.b")));
    }

    #[test]
    fn test_clean_payload_passes() {
        let body = json!({ "symbol": "GOLD", "amount": 100.0, "note": "weekly buy" });
        assert!(scan_payload(&body, 0.2).is_empty());
    }
}
