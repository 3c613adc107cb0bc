pub mod fields;
pub mod links;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::db::Record;
use crate::pages::PageRequest;

static ENTRY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.article ol > li").unwrap());

/// One parsed listing page.
pub struct Listing {
    doc: Html,
}

impl Listing {
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    /// One record per listing entry, in listing order. Missing fields come back as `None`.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.doc
            .select(&ENTRY_SEL)
            .enumerate()
            .map(|(i, entry)| build_record(entry, i))
    }

    pub fn pagination_links(&self, page_url: &Url) -> Vec<PageRequest> {
        links::extract(&self.doc, page_url)
    }
}

pub struct PageData {
    pub records: Vec<Record>,
    pub links: Vec<PageRequest>,
}

/// Parse a fetched page into its records and pagination links.
///
/// `Html` is not `Send`, so parsing stays inside this synchronous call.
pub fn process_page(html: &str, page_url: &Url) -> PageData {
    let listing = Listing::parse(html);
    PageData {
        records: listing.records().collect(),
        links: listing.pagination_links(page_url),
    }
}

fn build_record(entry: ElementRef, index: usize) -> Record {
    Record {
        title: recover(fields::title(entry, index)),
        rating: recover(fields::rating(entry, index)),
        subject: recover(fields::subject(entry, index)),
    }
}

fn recover<T>(field: Result<T, crate::error::ExtractionError>) -> Option<T> {
    field.map_err(|e| debug!("{}", e)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn page_url(offset: u32) -> Url {
        let base = Url::parse("https://movie.douban.com/top250").unwrap();
        PageRequest::new(offset).url(&base)
    }

    #[test]
    fn full_page_has_all_entries_in_order() {
        let data = process_page(&fixture("top250_start_0"), &page_url(0));
        assert_eq!(data.records.len(), 25);
        assert_eq!(data.records[0].title.as_deref(), Some("肖申克的救赎"));
        assert_eq!(data.records[0].rating, Some(9.7));
        assert_eq!(data.records[1].title.as_deref(), Some("霸王别姬"));
        assert!(data.records.iter().all(|r| r.title.is_some() && r.rating.is_some()));
    }

    #[test]
    fn full_page_pagination_covers_other_pages() {
        let data = process_page(&fixture("top250_start_0"), &page_url(0));
        let offsets: Vec<u32> = data.links.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![25, 50, 75, 100, 125, 150, 175, 200, 225]);
    }

    #[test]
    fn missing_rating_keeps_entry_and_siblings() {
        let data = process_page(&fixture("missing_fields"), &page_url(0));
        assert_eq!(data.records.len(), 3);

        let gap = &data.records[1];
        assert_eq!(gap.title.as_deref(), Some("千与千寻"));
        assert_eq!(gap.rating, None);
        assert_eq!(gap.subject.as_deref(), Some("最好的宫崎骏，最好的久石让。"));

        assert_eq!(data.records[0].rating, Some(9.7));
        assert_eq!(data.records[2].rating, Some(9.5));
        assert_eq!(data.records[2].subject, None);
    }

    #[test]
    fn records_are_restartable() {
        let listing = Listing::parse(&fixture("missing_fields"));
        let first: Vec<Record> = listing.records().collect();
        let second: Vec<Record> = listing.records().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn unrelated_page_yields_nothing() {
        let data = process_page("<html><body>rate limited</body></html>", &page_url(0));
        assert!(data.records.is_empty());
        assert!(data.links.is_empty());
    }
}
