//! Storage key generation.

use chrono::Utc;

const MAX_NAME_LEN: usize = 200;

/// Reduce an uploaded file name to a safe key component.
pub fn sanitize_filename(original: &str) -> String {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();

    let mut cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        return "file".to_string();
    }

    let mut name = cleaned.to_string();
    if name.len() > MAX_NAME_LEN {
        // Keep the extension when truncating.
        let ext = name
            .rfind('.')
            .map(|i| name[i..].to_string())
            .filter(|e| e.len() < 16)
            .unwrap_or_default();
        name.truncate(MAX_NAME_LEN - ext.len());
        name.push_str(&ext);
    }
    name
}

/// `{unix_millis}-{sanitized name}`
pub fn generate_storage_key(original: &str) -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), sanitize_filename(original))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report.pdf"), "report.pdf");
    }

    #[test]
    fn test_sanitize_replaces_odd_characters() {
        assert_eq!(sanitize_filename("my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
        assert_eq!(sanitize_filename("a..b.png"), "a.b.png");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn test_sanitize_truncates_and_keeps_extension() {
        let long = format!("{}.docx", "x".repeat(400));
        let name = sanitize_filename(&long);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with(".docx"));
    }

    #[test]
    fn test_key_has_millis_prefix() {
        let key = generate_storage_key("invoice.pdf");
        let (millis, rest) = key.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(rest, "invoice.pdf");
    }
}
