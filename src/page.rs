//! Server-rendered HTML for the single page of the front-end: the submission
//! form, an optional status message and the catalog grouped by day.

use std::fmt::Write;

use crate::catalog::{Catalog, VideoFileEntry};

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 56rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
form.submit textarea, form.submit input[type=url] { width: 100%; box-sizing: border-box; margin-bottom: .5rem; }
pre.status { background: #f3f6fa; border-left: 4px solid #3b6fb6; padding: .75rem; white-space: pre-wrap; }
ul.videos { list-style: none; padding: 0; }
ul.videos li { display: flex; gap: 1rem; align-items: baseline; padding: .35rem 0; border-bottom: 1px solid #eee; }
ul.videos .name { flex: 1; word-break: break-all; }
ul.videos form { display: inline; }
.empty { color: #777; }
"#;

/// Escapes text for use inside HTML element content or quoted attributes.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn download_href(filename: &str) -> String {
    format!("/download/{}", urlencoding::encode(filename))
}

pub fn delete_href(filename: &str) -> String {
    format!("/delete/{}", urlencoding::encode(filename))
}

/// Renders the full page.
pub fn render_index(message: Option<&str>, catalog: &Catalog) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str("<title>Video Downloader</title>\n<style>");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body>\n<h1>Video Downloader</h1>\n");

    html.push_str(concat!(
        "<form class=\"submit\" method=\"post\" action=\"/\">\n",
        "<label for=\"url\">Video URL</label>\n",
        "<input type=\"url\" id=\"url\" name=\"url\" placeholder=\"https://\">\n",
        "<label for=\"urls\">Or several URLs, one per line</label>\n",
        "<textarea id=\"urls\" name=\"urls\" rows=\"4\"></textarea>\n",
        "<button type=\"submit\">Download</button>\n",
        "</form>\n",
    ));

    if let Some(message) = message {
        let _ = writeln!(html, "<pre class=\"status\">{}</pre>", escape_html(message));
    }

    html.push_str("<h2>Downloaded videos</h2>\n");
    if catalog.is_empty() {
        html.push_str("<p class=\"empty\">No videos downloaded yet.</p>\n");
    }
    for group in &catalog.groups {
        let _ = writeln!(html, "<h3>{}</h3>\n<ul class=\"videos\">", escape_html(&group.date));
        for entry in &group.entries {
            render_entry(&mut html, entry);
        }
        html.push_str("</ul>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_entry(html: &mut String, entry: &VideoFileEntry) {
    let name = escape_html(&entry.filename);
    let _ = writeln!(
        html,
        concat!(
            "<li><span class=\"name\">{name}</span>",
            "<span class=\"time\">{time}</span>",
            "<span class=\"size\">{size} MB</span>",
            "<a href=\"{download}\">Download</a>",
            "<form method=\"post\" action=\"{delete}\" ",
            "onsubmit=\"return confirm('Delete this video?');\">",
            "<button type=\"submit\">Delete</button></form></li>"
        ),
        name = name,
        time = entry.timestamp.format("%H:%M"),
        size = entry.size_mb(),
        download = escape_html(&download_href(&entry.filename)),
        delete = escape_html(&delete_href(&entry.filename)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DateGroup;
    use chrono::{Local, TimeZone};
    use std::path::PathBuf;

    fn entry(name: &str, hour: u32) -> VideoFileEntry {
        let timestamp = Local.with_ymd_and_hms(2024, 3, 10, hour, 5, 0).unwrap();
        VideoFileEntry {
            filename: name.to_string(),
            size_bytes: 3 * 1024 * 1024,
            path: PathBuf::from("/downloads").join(name),
            date: "2024-03-10".to_string(),
            timestamp,
        }
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn hrefs_percent_encode_file_names() {
        assert_eq!(download_href("My Clip #1.mp4"), "/download/My%20Clip%20%231.mp4");
        assert_eq!(delete_href("a/b.mp4"), "/delete/a%2Fb.mp4");
    }

    #[test]
    fn empty_catalog_shows_placeholder() {
        let html = render_index(None, &Catalog::default());
        assert!(html.contains("No videos downloaded yet."));
        assert!(!html.contains("class=\"status\""));
        assert!(html.contains("name=\"urls\""));
        assert!(html.contains("name=\"url\""));
    }

    #[test]
    fn message_is_escaped() {
        let html = render_index(Some("Video \"<b>\" downloaded successfully!"), &Catalog::default());
        assert!(html.contains(
            "<pre class=\"status\">Video &quot;&lt;b&gt;&quot; downloaded successfully!</pre>"
        ));
    }

    #[test]
    fn catalog_groups_render_in_order() {
        let catalog = Catalog {
            groups: vec![
                DateGroup {
                    date: "2024-03-11".into(),
                    entries: vec![entry("new.mp4", 9)],
                },
                DateGroup {
                    date: "2024-03-10".into(),
                    entries: vec![entry("late.mkv", 18), entry("early <1>.webm", 7)],
                },
            ],
        };
        let html = render_index(None, &catalog);
        let first = html.find("2024-03-11").unwrap();
        let second = html.find("2024-03-10").unwrap();
        assert!(first < second);
        let late = html.find("late.mkv").unwrap();
        let early = html.find("early &lt;1&gt;.webm").unwrap();
        assert!(late < early);
        assert!(html.contains("3.00 MB"));
        assert!(html.contains("18:05"));
        assert!(html.contains("href=\"/download/late.mkv\""));
        assert!(html.contains("action=\"/delete/early%20%3C1%3E.webm\""));
    }
}
