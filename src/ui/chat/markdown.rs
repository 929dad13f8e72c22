//! Markdown to HTML for message bubbles

use pulldown_cmark::{html, Event, Options, Parser};

/// Renders `source` as HTML.
///
/// Raw HTML in the source is escaped and shown as text, model output never
/// reaches the webview as markup.
pub fn render_markdown(source: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;

    let parser = Parser::new_ext(source, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(source.len() + source.len() / 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_formatting() {
        assert_eq!(
            render_markdown("Hello **world**"),
            "<p>Hello <strong>world</strong></p>\n"
        );
    }

    #[test]
    fn test_code_block_keeps_language() {
        let out = render_markdown("```rust\nfn main() {}\n```");
        assert!(out.contains("<pre><code class=\"language-rust\">"));
        assert!(out.contains("fn main() {}"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let out = render_markdown("<script>alert(1)</script>\n\ntext with <b>tag</b>");
        assert!(!out.contains("<script>"));
        assert!(!out.contains("<b>"));
        assert!(out.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(render_markdown(""), "");
    }
}
