//! Content markup for log entries
//!
//! Turns free text from the agent server into safe HTML fragments:
//! - Literal escaping of everything the server sent
//! - `img://` sentinels expanded into inline images
//! - Absolute paths split into clickable per-component segments
//! - Markdown (CommonMark + tables/strikethrough/task lists) for types that call for it
//! - Hyperlinks opened in a new tab with `noopener noreferrer`
//!
//! Raw HTML inside markdown is never interpreted; pulldown-cmark's HTML events are
//! re-emitted as text so they come out escaped.

use once_cell::sync::Lazy;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::{Captures, Regex};
use shared_types::IMAGE_SENTINEL;

/// Endpoint that serves images referenced by `img://` sentinels.
pub const IMAGE_ENDPOINT: &str = "/image_get?path=";

static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"img://([^\s"'<>&]+)"#).expect("image sentinel regex is valid")
});

// Path must start a token: beginning of text, whitespace or an opening bracket.
static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(^|[\s(\[])((?:/[A-Za-z0-9._~+@-]+)+/?)"#).expect("path regex is valid")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<a\s([^>]*)>").expect("anchor regex is valid"));

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href\s*=\s*"([^"]*)""#).expect("href regex is valid"));

static TARGET_REL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s*(?:target|rel)\s*=\s*"[^"]*""#).expect("target/rel regex is valid")
});

/// Escape HTML special characters
pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Render entry content. `markdown` selects markdown interpretation.
pub fn render_content(input: &str, markdown: bool) -> String {
    let html = if markdown {
        render_markdown(input)
    } else {
        expand_inline(&escape_html(input))
    };
    harden_links(&html)
}

/// Render a single kvp string value (never markdown).
pub fn render_value_text(input: &str) -> String {
    if let Some(path) = input.trim().strip_prefix(IMAGE_SENTINEL) {
        return image_tag(&escape_html(path));
    }
    render_content(input, false)
}

/// Expand sentinels and paths inside already-escaped text.
pub fn expand_inline(escaped: &str) -> String {
    let with_images = IMAGE_RE
        .replace_all(escaped, |caps: &Captures| image_tag(&caps[1]))
        .into_owned();
    map_text_segments(&with_images, linkify_paths)
}

fn image_tag(escaped_path: &str) -> String {
    format!(r#"<img class="log-image" src="{IMAGE_ENDPOINT}{escaped_path}" alt="image">"#)
}

/// Apply `f` to the text between tags, leaving tags themselves untouched.
fn map_text_segments(html: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for tag in TAG_RE.find_iter(html) {
        out.push_str(&f(&html[last..tag.start()]));
        out.push_str(tag.as_str());
        last = tag.end();
    }
    out.push_str(&f(&html[last..]));
    out
}

fn linkify_paths(text: &str) -> String {
    PATH_RE
        .replace_all(text, |caps: &Captures| {
            format!("{}{}", &caps[1], path_segments(&caps[2]))
        })
        .into_owned()
}

/// `/a/b` → one clickable span per component, each opening its own prefix.
fn path_segments(path: &str) -> String {
    let trailing_slash = path.ends_with('/') && path.len() > 1;
    let mut out = String::from(r#"<span class="path-link">"#);
    let mut prefix = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        prefix.push('/');
        prefix.push_str(component);
        out.push_str(&format!(
            r#"/<span class="path-segment" data-path="{prefix}">{component}</span>"#
        ));
    }
    if trailing_slash {
        out.push('/');
    }
    out.push_str("</span>");
    out
}

fn render_markdown(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_TABLES);

    let mut in_code_block = false;
    let events = Parser::new_ext(input, options).map(|event| match event {
        Event::Start(Tag::CodeBlock(kind)) => {
            in_code_block = true;
            Event::Start(Tag::CodeBlock(kind))
        }
        Event::End(TagEnd::CodeBlock) => {
            in_code_block = false;
            Event::End(TagEnd::CodeBlock)
        }
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Text(text) if !in_code_block => {
            Event::InlineHtml(CowStr::from(expand_inline(&escape_html(&text))))
        }
        other => other,
    });

    let mut html_output = String::with_capacity(input.len() * 2);
    html::push_html(&mut html_output, events);
    html_output
}

/// Give every external hyperlink `target="_blank" rel="noopener noreferrer"`.
///
/// In-page anchors (`#...`) and `javascript:` links are left as they are.
pub fn harden_links(html: &str) -> String {
    ANCHOR_RE
        .replace_all(html, |caps: &Captures| {
            let attrs = &caps[1];
            let Some(href) = HREF_RE.captures(attrs).map(|h| h[1].trim().to_string()) else {
                return caps[0].to_string();
            };
            if href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
                return caps[0].to_string();
            }
            let stripped = TARGET_REL_RE.replace_all(attrs, "");
            format!(
                r#"<a {} target="_blank" rel="noopener noreferrer">"#,
                stripped.trim_end()
            )
        })
        .into_owned()
}

/// Extract plain text (for one-line summaries)
pub fn plain_text(input: &str) -> String {
    let mut text = String::new();
    for event in Parser::new_ext(input, Options::empty()) {
        match event {
            Event::Text(content) | Event::Code(content) => text.push_str(&content),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            _ => {}
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_content_is_escaped() {
        let html = render_content("<script>alert('x')</script>", false);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_image_sentinel_becomes_inline_image() {
        let html = render_content("see img://tmp/shot.png now", false);
        assert!(html.contains(r#"<img class="log-image" src="/image_get?path=tmp/shot.png""#));
        assert!(!html.contains("img://"));
    }

    #[test]
    fn test_paths_split_per_component() {
        let html = render_content("wrote /root/work/out.txt ok", false);
        assert!(html.contains(r#"data-path="/root">root</span>"#));
        assert!(html.contains(r#"data-path="/root/work">work</span>"#));
        assert!(html.contains(r#"data-path="/root/work/out.txt">out.txt</span>"#));
    }

    #[test]
    fn test_urls_are_not_treated_as_paths() {
        let html = render_content("visit https://example.com/a/b", false);
        assert!(!html.contains("path-link"));
    }

    #[test]
    fn test_image_paths_inside_tags_are_not_linkified() {
        let html = render_content("img:///root/shot.png", false);
        assert!(html.contains(r#"src="/image_get?path=/root/shot.png""#));
        assert!(!html.contains("path-segment"));
    }

    #[test]
    fn test_markdown_links_get_safe_attributes() {
        let html = render_content("[docs](https://example.com)", true);
        assert!(html.contains(r#"target="_blank" rel="noopener noreferrer""#));
    }

    #[test]
    fn test_anchor_and_script_links_untouched() {
        let raw = r##"<a href="#top">top</a><a href="javascript:void(0)">x</a>"##;
        assert_eq!(harden_links(raw), raw);
    }

    #[test]
    fn test_markdown_raw_html_is_escaped() {
        let html = render_content("hello <b onclick=\"x\">bold</b>", true);
        assert!(!html.contains("<b "));
        assert!(html.contains("&lt;b"));
    }

    #[test]
    fn test_markdown_code_blocks_are_not_double_escaped() {
        let html = render_content("```\na < b\n```", true);
        assert!(html.contains("a &lt; b"));
        assert!(!html.contains("&amp;lt;"));
    }

    #[test]
    fn test_plain_text_strips_formatting() {
        assert_eq!(plain_text("Hello **world**!"), "Hello world!");
    }
}
