//! Breadth-first single-site crawler that feeds [`crate::store::DocumentStore::build_from_files`].
//!
//! Each saved page becomes `<output_dir>/<path>.txt` starting with a
//! `URL: <page url>` line and a blank line, followed by the page text.

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::State;

const USER_AGENT: &str = concat!("vekta-rag/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid url '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid selector '{0}'")]
    Selector(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("page declares non-utf-8 charset '{0}'")]
    Encoding(String),
    #[error("no element matches '{0}'")]
    MissingContent(String),
    #[error("content root has no text")]
    EmptyContent,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: String,
    pub max_pages: usize,
    pub output_dir: PathBuf,
    pub content_selector: String,
    pub timeout: Duration,
    /// Crawl even when `output_dir` already holds files.
    pub force: bool,
}

impl CrawlConfig {
    pub fn from_state(state: &State) -> Self {
        Self {
            base_url: state.crawl_base_url.clone(),
            max_pages: state.crawl_max_pages,
            output_dir: state.docs_dir.clone(),
            content_selector: state.content_selector.clone(),
            timeout: state.request_timeout,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub text: String,
    pub links: Vec<Url>,
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub saved: Vec<PathBuf>,
    pub failures: Vec<(String, CrawlError)>,
    /// Set when an existing output directory short-circuited the crawl.
    pub skipped: bool,
}

pub struct Crawler {
    client: Client,
    config: CrawlConfig,
    base: Url,
    content: Selector,
    anchors: Selector,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Result<Self, CrawlError> {
        let base = Url::parse(&config.base_url).map_err(|source| CrawlError::Url {
            url: config.base_url.clone(),
            source,
        })?;
        let content = parse_selector(&config.content_selector)?;
        let anchors = parse_selector("a[href]")?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            config,
            base,
            content,
            anchors,
        })
    }

    /// Fetches and parses one page. Every way this can fail is an `Err`.
    pub fn fetch_page(&self, url: &Url) -> Result<Page, CrawlError> {
        let resp = self.client.get(url.clone()).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CrawlError::Status(status));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if let Some(charset) = declared_charset(content_type.as_deref()) {
            if !is_utf8_label(&charset) {
                return Err(CrawlError::Encoding(charset));
            }
        }
        let body = resp.text()?;
        extract_page(
            &body,
            url,
            &self.content,
            &self.anchors,
            &self.config.content_selector,
        )
    }

    pub fn crawl(&self) -> Result<CrawlReport, CrawlError> {
        let out = &self.config.output_dir;
        if !self.config.force && has_entries(out)? {
            info!(
                "{} already holds pages; skipping crawl (force to re-crawl)",
                out.display()
            );
            return Ok(CrawlReport {
                skipped: true,
                ..CrawlReport::default()
            });
        }
        fs::create_dir_all(out)?;

        let mut report = CrawlReport::default();
        let mut queue = VecDeque::from([self.base.clone()]);
        let mut seen: HashSet<String> = HashSet::from([self.base.to_string()]);

        while let Some(url) = queue.pop_front() {
            if report.saved.len() >= self.config.max_pages {
                break;
            }
            let page = match self.fetch_page(&url) {
                Ok(page) => page,
                Err(err) => {
                    warn!("failed to crawl {}: {}", url, err);
                    report.failures.push((url.to_string(), err));
                    continue;
                }
            };

            let path = match save_page(out, &page) {
                Ok(path) => path,
                Err(err) => {
                    warn!("failed to save {}: {}", url, err);
                    report.failures.push((url.to_string(), err));
                    continue;
                }
            };
            info!("saved {} to {}", page.url, path.display());
            report.saved.push(path);

            for link in page.links {
                if is_crawlable(&link, &self.base) && seen.insert(link.to_string()) {
                    debug!("queued {}", link);
                    queue.push_back(link);
                }
            }
        }

        info!(
            "crawl finished: {} saved, {} failed",
            report.saved.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

fn parse_selector(raw: &str) -> Result<Selector, CrawlError> {
    Selector::parse(raw).map_err(|_| CrawlError::Selector(raw.to_string()))
}

/// Pulls the text and outgoing links out of the content root of `html`.
pub fn extract_page(
    html: &str,
    page_url: &Url,
    content: &Selector,
    anchors: &Selector,
    content_selector: &str,
) -> Result<Page, CrawlError> {
    let document = Html::parse_document(html);
    let root = document
        .select(content)
        .next()
        .ok_or_else(|| CrawlError::MissingContent(content_selector.to_string()))?;

    let text = collect_text(root);
    if text.is_empty() {
        return Err(CrawlError::EmptyContent);
    }

    let links = root
        .select(anchors)
        .filter_map(|el| el.value().attr("href"))
        // Relative links resolve against the page they appear on, not the crawl root.
        .filter_map(|href| page_url.join(href.trim()).ok())
        .collect();

    Ok(Page {
        url: page_url.clone(),
        text,
        links,
    })
}

fn collect_text(root: ElementRef<'_>) -> String {
    let mut pieces = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| {
                parent
                    .value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
            })
            .unwrap_or(false);
        if hidden {
            continue;
        }
        let piece = text.trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }
    pieces.join("\n")
}

/// Same host as `base`, http(s), and no fragment.
pub fn is_crawlable(candidate: &Url, base: &Url) -> bool {
    matches!(candidate.scheme(), "http" | "https")
        && candidate.host_str() == base.host_str()
        && candidate.fragment().is_none()
}

/// `https://host/blog/some-post/` -> `blog_some-post.txt`; the site root maps to `index.txt`.
pub fn file_name_for(url: &Url) -> String {
    let stem = url.path().trim_matches('/').replace('/', "_");
    let stem = if stem.is_empty() { "index".to_string() } else { stem };
    if stem.ends_with(".txt") {
        stem
    } else {
        format!("{}.txt", stem)
    }
}

pub fn save_page(dir: &Path, page: &Page) -> Result<PathBuf, CrawlError> {
    let path = dir.join(file_name_for(&page.url));
    fs::write(&path, format!("URL: {}\n\n{}", page.url, page.text))?;
    Ok(path)
}

fn declared_charset(content_type: Option<&str>) -> Option<String> {
    content_type?.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

fn is_utf8_label(label: &str) -> bool {
    matches!(label, "utf-8" | "utf8")
}

fn has_entries(dir: &Path) -> Result<bool, CrawlError> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::tempdir;

    type Hits = Arc<Mutex<HashMap<String, usize>>>;

    fn html_page(title: &str, links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!("<a href=\"{}\">{}</a>", href, href))
            .collect();
        format!(
            "<html><body><div id=\"primary\"><p>{}</p>{}</div></body></html>",
            title, anchors
        )
    }

    /// Serves `pages` by path on a loopback port, answering 404 for anything else,
    /// and counts requests per path.
    fn serve(pages: Vec<(String, String)>) -> (String, Hits) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let pages: HashMap<String, String> = pages.into_iter().collect();
        let hits: Hits = Arc::default();
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap_or(0) == 0 || header == "\r\n" {
                        break;
                    }
                }
                *counter.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

                let (status, body) = match pages.get(&path) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", String::new()),
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (base, hits)
    }

    fn crawler_for(base: &str, max_pages: usize, output_dir: &Path) -> Crawler {
        Crawler::new(CrawlConfig {
            base_url: base.to_string(),
            max_pages,
            output_dir: output_dir.to_path_buf(),
            content_selector: "#primary".into(),
            timeout: Duration::from_secs(5),
            force: false,
        })
        .unwrap()
    }

    fn hits_for(hits: &Hits, path: &str) -> usize {
        hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    const PAGE: &str = r##"
        <html><body>
          <nav><a href="/blog/outside-primary">skip me</a></nav>
          <div id="primary">
            <h1>Admissions 2024</h1>
            <p>Applications open in <b>May</b>.</p>
            <script>var tracking = 1;</script>
            <a href="/blog/next-post/">Next</a>
            <a href="https://other.example.org/page">Elsewhere</a>
            <a href="#comments">Comments</a>
          </div>
        </body></html>"##;

    fn selectors() -> (Selector, Selector) {
        (
            Selector::parse("#primary").unwrap(),
            Selector::parse("a[href]").unwrap(),
        )
    }

    #[test]
    fn extracts_text_and_links_from_the_content_root() {
        let (content, anchors) = selectors();
        let url = Url::parse("https://www.niet.co.in/blog").unwrap();
        let page = extract_page(PAGE, &url, &content, &anchors, "#primary").unwrap();

        assert_eq!(
            page.text,
            "Admissions 2024\nApplications open in\nMay\n.\nNext\nElsewhere\nComments"
        );
        let links: Vec<String> = page.links.iter().map(Url::to_string).collect();
        assert_eq!(
            links,
            vec![
                "https://www.niet.co.in/blog/next-post/",
                "https://other.example.org/page",
                "https://www.niet.co.in/blog#comments",
            ]
        );
    }

    #[test]
    fn relative_links_resolve_against_the_page() {
        let (content, anchors) = selectors();
        let url = Url::parse("https://www.niet.co.in/blog/admissions/").unwrap();
        let html = r#"<div id="primary"><p>Dates</p><a href="fees/">Fees</a></div>"#;
        let page = extract_page(html, &url, &content, &anchors, "#primary").unwrap();
        assert_eq!(
            page.links[0].as_str(),
            "https://www.niet.co.in/blog/admissions/fees/"
        );
    }

    #[test]
    fn missing_content_root_is_an_error() {
        let (content, anchors) = selectors();
        let url = Url::parse("https://www.niet.co.in/").unwrap();
        let err = extract_page("<html><body><p>hi</p></body></html>", &url, &content, &anchors, "#primary")
            .unwrap_err();
        assert!(matches!(err, CrawlError::MissingContent(_)));
    }

    #[test]
    fn only_same_site_links_without_fragments_are_followed() {
        let base = Url::parse("https://www.niet.co.in/blog").unwrap();
        let ok = Url::parse("https://www.niet.co.in/blog/post").unwrap();
        let other_host = Url::parse("https://niet.co.in/blog/post").unwrap();
        let fragment = Url::parse("https://www.niet.co.in/blog#top").unwrap();
        let mail = Url::parse("mailto:info@niet.co.in").unwrap();
        assert!(is_crawlable(&ok, &base));
        assert!(!is_crawlable(&other_host, &base));
        assert!(!is_crawlable(&fragment, &base));
        assert!(!is_crawlable(&mail, &base));
    }

    #[test]
    fn file_names_flatten_the_path() {
        let name = |raw: &str| file_name_for(&Url::parse(raw).unwrap());
        assert_eq!(name("https://www.niet.co.in/blog/some-post/"), "blog_some-post.txt");
        assert_eq!(name("https://www.niet.co.in/"), "index.txt");
        assert_eq!(name("https://www.niet.co.in/notes.txt"), "notes.txt");
    }

    #[test]
    fn charset_parsing() {
        assert_eq!(
            declared_charset(Some("text/html; charset=UTF-8")).as_deref(),
            Some("utf-8")
        );
        assert_eq!(
            declared_charset(Some("text/html;charset=\"ISO-8859-1\"")).as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(declared_charset(Some("text/html")), None);
        assert_eq!(declared_charset(None), None);
        assert!(is_utf8_label("utf8"));
        assert!(!is_utf8_label("iso-8859-1"));
    }

    #[test]
    fn saved_pages_ingest_with_their_url() {
        let dir = tempdir().unwrap();
        let page = Page {
            url: Url::parse("https://www.niet.co.in/blog/admissions").unwrap(),
            text: "Applications open in May.".into(),
            links: Vec::new(),
        };
        let path = save_page(dir.path(), &page).unwrap();
        assert_eq!(path.file_name().unwrap(), "blog_admissions.txt");

        let report = DocumentStore::build_from_files(dir.path(), 1024).unwrap();
        let doc = report.store.get(0).unwrap();
        assert_eq!(doc.text, "Applications open in May.");
        assert_eq!(
            doc.source_url.as_deref(),
            Some("https://www.niet.co.in/blog/admissions")
        );
    }

    #[test]
    fn existing_output_skips_the_crawl() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.txt"), "URL: https://a.test/\n\nold").unwrap();
        let crawler = Crawler::new(CrawlConfig {
            base_url: "https://a.test/".into(),
            max_pages: 5,
            output_dir: dir.path().to_path_buf(),
            content_selector: "#primary".into(),
            timeout: Duration::from_secs(1),
            force: false,
        })
        .unwrap();
        let report = crawler.crawl().unwrap();
        assert!(report.skipped);
        assert!(report.saved.is_empty());
    }

    #[test]
    fn crawl_walks_breadth_first_up_to_the_page_cap() {
        let (base, hits) = serve(vec![
            (
                "/".into(),
                html_page("Home", &["/a", "/a", "/missing", "/b", "/c"]),
            ),
            ("/a".into(), html_page("Page A", &["/", "/b"])),
            ("/b".into(), html_page("Page B", &[])),
            ("/c".into(), html_page("Page C", &[])),
        ]);
        let dir = tempdir().unwrap();
        let out = dir.path().join("pages");

        let report = crawler_for(&base, 3, &out).crawl().unwrap();

        assert!(!report.skipped);
        let names: Vec<String> = report
            .saved
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.txt", "a.txt", "b.txt"]);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, format!("{}missing", base));
        assert!(matches!(
            report.failures[0].1,
            CrawlError::Status(code) if code == StatusCode::NOT_FOUND
        ));

        assert_eq!(hits_for(&hits, "/"), 1);
        assert_eq!(hits_for(&hits, "/a"), 1);
        assert_eq!(hits_for(&hits, "/b"), 1);
        assert_eq!(hits_for(&hits, "/c"), 0);

        let saved = fs::read_to_string(out.join("a.txt")).unwrap();
        assert_eq!(saved, format!("URL: {}a\n\nPage A\n/\n/b", base));
    }

    #[test]
    fn a_page_that_cannot_be_saved_does_not_stop_the_crawl() {
        let long_path = format!("/{}", "a".repeat(300));
        let (base, _hits) = serve(vec![
            ("/".into(), html_page("Home", &[long_path.as_str(), "/b"])),
            (long_path.clone(), html_page("Long", &[])),
            ("/b".into(), html_page("Page B", &[])),
        ]);
        let dir = tempdir().unwrap();

        let report = crawler_for(&base, 5, dir.path()).crawl().unwrap();

        assert_eq!(report.saved.len(), 2);
        assert_eq!(report.saved[1], dir.path().join("b.txt"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, format!("{}{}", base, &long_path[1..]));
        assert!(matches!(report.failures[0].1, CrawlError::Io(_)));
    }

    #[test]
    fn bad_configuration_is_rejected() {
        let config = CrawlConfig {
            base_url: "not a url".into(),
            max_pages: 1,
            output_dir: PathBuf::from("unused"),
            content_selector: "#primary".into(),
            timeout: Duration::from_secs(1),
            force: false,
        };
        assert!(matches!(
            Crawler::new(config.clone()),
            Err(CrawlError::Url { .. })
        ));
        let config = CrawlConfig {
            base_url: "https://a.test/".into(),
            content_selector: "[[".into(),
            ..config
        };
        assert!(matches!(
            Crawler::new(config),
            Err(CrawlError::Selector(_))
        ));
    }
}
