use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::error::ExtractionError;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.title").unwrap());
static RATING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.rating_num").unwrap());
static SUBJECT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.inq").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// First `span.title`; later ones hold the alternate-language title.
pub fn title(entry: ElementRef, index: usize) -> Result<String, ExtractionError> {
    first_text(entry, &TITLE_SEL).ok_or(ExtractionError::MissingField {
        index,
        field: "title",
    })
}

pub fn rating(entry: ElementRef, index: usize) -> Result<f64, ExtractionError> {
    let raw = first_text(entry, &RATING_SEL).ok_or(ExtractionError::MissingField {
        index,
        field: "rating",
    })?;
    raw.parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
        .ok_or(ExtractionError::InvalidRating { index, raw })
}

/// The one-line tagline. Plenty of entries have none.
pub fn subject(entry: ElementRef, index: usize) -> Result<String, ExtractionError> {
    first_text(entry, &SUBJECT_SEL).ok_or(ExtractionError::MissingField {
        index,
        field: "subject",
    })
}

fn first_text(entry: ElementRef, selector: &Selector) -> Option<String> {
    entry
        .select(selector)
        .next()
        .map(|el| normalize(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Collapse runs of whitespace (including `&nbsp;`) and trim.
pub fn normalize(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn with_entry<T>(html: &str, f: impl FnOnce(ElementRef) -> T) -> T {
        let doc = Html::parse_fragment(html);
        let li = Selector::parse("li").unwrap();
        let entry = doc.select(&li).next().unwrap();
        f(entry)
    }

    #[test]
    fn reads_all_three() {
        let html = r#"<ul><li>
            <span class="title">肖申克的救赎</span>
            <span class="title">&nbsp;/&nbsp;The Shawshank Redemption</span>
            <span class="rating_num">9.7</span>
            <span class="inq">希望让人自由。</span>
        </li></ul>"#;
        with_entry(html, |e| {
            assert_eq!(title(e, 0).unwrap(), "肖申克的救赎");
            assert_eq!(rating(e, 0).unwrap(), 9.7);
            assert_eq!(subject(e, 0).unwrap(), "希望让人自由。");
        });
    }

    #[test]
    fn bad_rating_is_reported_with_raw_text() {
        let html = r#"<ul><li><span class="rating_num"> n/a </span></li></ul>"#;
        with_entry(html, |e| {
            assert_eq!(
                rating(e, 3),
                Err(ExtractionError::InvalidRating {
                    index: 3,
                    raw: "n/a".into()
                })
            );
        });
    }

    #[test]
    fn blank_subject_counts_as_missing() {
        let html = r#"<ul><li><span class="inq">   </span></li></ul>"#;
        with_entry(html, |e| {
            assert_eq!(
                subject(e, 1),
                Err(ExtractionError::MissingField {
                    index: 1,
                    field: "subject"
                })
            );
        });
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  a \n\t b\u{a0}c "), "a b c");
    }
}
