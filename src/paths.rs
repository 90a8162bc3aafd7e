use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NON_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9-]+").expect("valid slug regex"));

/// ASCII slug: accents are decomposed and dropped, other runs become `-`.
pub fn slugify(s: &str) -> String {
    let ascii: String = s.nfkd().filter(char::is_ascii).collect();
    NON_SLUG
        .replace_all(&ascii, "-")
        .trim_matches('-')
        .to_string()
}

/// Expand a post path format such as `/{year}/{month}/{slug}`.
///
/// `num > 0` disambiguates colliding slugs as `slug-num`.
pub fn format_post_path(format: &str, title: &str, published: DateTime<Utc>, num: u32) -> String {
    let mut slug = slugify(title);
    if num > 0 {
        slug.push_str(&format!("-{num}"));
    }
    format
        .replace("{slug}", &slug)
        .replace("{year}", &published.year().to_string())
        .replace("{month}", &format!("{:02}", published.month()))
        .replace("{day}", &format!("{:02}", published.day()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_drops_accents_and_punctuation() {
        assert_eq!(slugify("Héllo, Wörld!"), "Hello-World");
        assert_eq!(slugify("  --already-slugged--  "), "already-slugged");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn post_path_uses_padded_date_parts() {
        let ts = Utc.with_ymd_and_hms(2009, 3, 7, 10, 0, 0).unwrap();
        assert_eq!(
            format_post_path("/{year}/{month}/{slug}", "First Post", ts, 0),
            "/2009/03/First-Post"
        );
        assert_eq!(
            format_post_path("/{year}/{month}/{day}/{slug}", "First Post", ts, 2),
            "/2009/03/07/First-Post-2"
        );
    }
}
