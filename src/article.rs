use scraper::Html;
use serde::{Deserialize, Serialize};

/// One normalized news item.
///
/// `link` is the identity of an article: image updates find their target by
/// link, never by position. `published_at` keeps the feed's own date string so
/// that relative labels can be recomputed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    pub source: String,
    pub category: String,
    pub published_at: String,
    pub image_url: Option<String>,
}

impl Article {
    /// Route key for the detail view.
    pub fn slug(&self) -> String {
        slugify(&self.title)
    }

    pub fn with_image(&self, image_url: &str) -> Self {
        Self {
            image_url: Some(image_url.to_string()),
            ..self.clone()
        }
    }
}

/// Lowercase, collapse every run of non-alphanumeric characters into a single
/// `-`, and drop leading/trailing dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Plain-text rendition of a feed description for list and detail views.
pub fn clean_description(description: &str) -> String {
    let markup = description.replace("</p><p>", ". ");
    let fragment = Html::parse_fragment(&markup);
    let text: String = fragment.root_element().text().collect();

    let text = text
        .replace("Continue reading...", "")
        .replace("Continue reading\u{2026}", "");
    let text = collapse_dots(&text);

    text.replace('\u{2019}', "'")
        .replace('\u{2014}', "-")
        .replace('\u{2026}', "...")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

fn collapse_dots(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '.' && result.ends_with('.') {
            continue;
        }
        result.push(ch);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_article(title: &str) -> Article {
        Article {
            title: title.to_string(),
            link: "https://news.example.com/a".to_string(),
            description: "<p>Body</p>".to_string(),
            source: "Example".to_string(),
            category: "News".to_string(),
            published_at: "Mon, 09 Dec 2024 12:00:00 GMT".to_string(),
            image_url: None,
        }
    }

    mod slugify_tests {
        use super::*;

        #[test]
        fn test_simple_title() {
            assert_eq!(slugify("Hello World"), "hello-world");
        }

        #[test]
        fn test_punctuation_runs_collapse() {
            assert_eq!(
                slugify("Breaking: Storm -- hits   coast!"),
                "breaking-storm-hits-coast"
            );
        }

        #[test]
        fn test_leading_and_trailing_separators_dropped() {
            assert_eq!(slugify("  ...Why? "), "why");
        }

        #[test]
        fn test_non_ascii_becomes_separator() {
            assert_eq!(slugify("Café in Montréal"), "caf-in-montr-al");
        }

        #[test]
        fn test_empty_title() {
            assert_eq!(slugify("!!!"), "");
        }
    }

    mod clean_description_tests {
        use super::*;

        #[test]
        fn test_strips_markup_and_joins_paragraphs() {
            let cleaned = clean_description("<p>First</p><p>Second</p>");
            assert_eq!(cleaned, "First. Second");
        }

        #[test]
        fn test_removes_continue_reading() {
            let cleaned = clean_description("Story text. Continue reading...");
            assert_eq!(cleaned, "Story text.");
        }

        #[test]
        fn test_decodes_common_entities() {
            let cleaned = clean_description("It&#8217;s here &#8212; finally&#8230;");
            assert_eq!(cleaned, "It's here - finally...");
        }

        #[test]
        fn test_collapses_repeated_dots() {
            assert_eq!(clean_description("Wait.... what"), "Wait. what");
        }

        #[test]
        fn test_named_entities_and_attribute_brackets() {
            let cleaned = clean_description(
                r#"<p>Q&amp;A: <a href="/x" title="a > b">&quot;Ask&quot;</a>&nbsp;now</p>"#,
            );
            assert_eq!(cleaned, "Q&A: \"Ask\" now");
        }

        #[test]
        fn test_escaped_ellipsis_continue_reading_removed() {
            let cleaned = clean_description("<p>Story text.</p><p>Continue reading&#8230;</p>");
            assert_eq!(cleaned, "Story text.");
        }

        #[test]
        fn test_image_markup_removed() {
            let cleaned = clean_description(r#"<img src="https://x/y.jpg"/>Caption"#);
            assert_eq!(cleaned, "Caption");
        }
    }

    #[test]
    fn test_article_slug_uses_title() {
        let article = create_test_article("Rust 2.0 Released");
        assert_eq!(article.slug(), "rust-2-0-released");
    }

    #[test]
    fn test_with_image_leaves_original_untouched() {
        let article = create_test_article("Title");
        let updated = article.with_image("https://img.example.com/1.jpg");

        assert!(article.image_url.is_none());
        assert_eq!(
            updated.image_url.as_deref(),
            Some("https://img.example.com/1.jpg")
        );
        assert_eq!(updated.link, article.link);
    }
}
