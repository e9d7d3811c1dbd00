//! Read-only wikitext inspection helpers.
//!
//! These back the `mw.*` functions exposed to Lua guests.  They are pure:
//! no I/O, no global state beyond the compiled patterns.

use std::sync::LazyLock;

use regex::Regex;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^=+[ \t]*(.+?)[ \t]*=+[ \t]*$").expect("valid regex"));

static REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#REDIRECT\s*\[\[").expect("valid regex"));

static CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[\s*category\s*:\s*([^\]|]+?)\s*(?:\|[^\]]*)?\]\]").expect("valid regex")
});

/// The text of the first section heading, if any.
pub fn title(text: &str) -> Option<&str> {
    HEADING
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `text` is a redirect page (`#REDIRECT [[Target]]`).
pub fn is_redirect(text: &str) -> bool {
    REDIRECT.is_match(text)
}

/// Category names in order of appearance, without sort keys.
pub fn categories(text: &str) -> Vec<&str> {
    CATEGORY
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_takes_first_heading() {
        let text = "intro\n== History ==\nbody\n=== Early life ===\n";
        assert_eq!(title(text), Some("History"));
    }

    #[test]
    fn title_absent() {
        assert_eq!(title("no headings here"), None);
    }

    #[test]
    fn redirect_detection() {
        assert!(is_redirect("#REDIRECT [[Main Page]]"));
        assert!(is_redirect("#redirect[[Main Page]]"));
        assert!(!is_redirect("See #REDIRECT [[Main Page]]"));
        assert!(!is_redirect("Some article content"));
    }

    #[test]
    fn categories_in_order() {
        let text = "Body\n[[Category:Foo]]\n[[Category:Bar]]";
        assert_eq!(categories(text), vec!["Foo", "Bar"]);
    }

    #[test]
    fn categories_strip_sort_keys_and_case() {
        let text = "[[category: Living people |Smith, John]] [[Category:1970 births]]";
        assert_eq!(categories(text), vec!["Living people", "1970 births"]);
    }

    #[test]
    fn categories_ignore_plain_links() {
        assert!(categories("[[Foo]] [[File:Bar.png]]").is_empty());
    }
}
