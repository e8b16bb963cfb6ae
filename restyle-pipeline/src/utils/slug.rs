//! File-name-safe style labels

/// Maximum slug length in characters
pub const MAX_SLUG_LEN: usize = 48;

/// Lower-case the style, collapse runs of non-alphanumerics to `-`
///
/// Returns `default` for styles with no usable characters. Only used to
/// build file names; executables receive the raw style string.
pub fn style_slug(style: &str) -> String {
    let mut slug = String::with_capacity(style.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;

    for c in style.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_styles() {
        assert_eq!(style_slug("rock"), "rock");
        assert_eq!(style_slug("Lo-Fi Hip Hop"), "lo-fi-hip-hop");
        assert_eq!(style_slug("  R&B / Soul!! "), "r-b-soul");
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(style_slug(""), "default");
        assert_eq!(style_slug("???"), "default");
        assert_eq!(style_slug("日本"), "default");
    }

    #[test]
    fn test_path_characters_never_survive() {
        let slug = style_slug("../../etc/passwd");
        assert_eq!(slug, "etc-passwd");
        assert!(!slug.contains('/'));
    }

    #[test]
    fn test_length_capped() {
        let slug = style_slug(&"a".repeat(200));
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_distinct_styles_distinct_slugs() {
        assert_ne!(style_slug("rock"), style_slug("jazz"));
    }
}
