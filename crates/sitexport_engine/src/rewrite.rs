//! Content rewriting for fetched HTML, CSS and inline scripts.
//!
//! The functions here only find URLs and splice replacements back in; what a
//! URL becomes is decided by the [`UrlRewriter`] passed in.

use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::{Captures, Regex};
use scraper::node::{Element, Node};
use scraper::Html;

/// Maps a URL found in content to its replacement.
pub trait UrlRewriter {
    /// `hint` is the content type the markup declares for the target, if
    /// any. Returning `None` leaves the value untouched.
    fn rewrite_url(&mut self, value: &str, hint: Option<&str>) -> Option<String>;
}

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| compiled(r"url\(([^)]+)\)"));

/// Single or double quoted string literal, escapes included.
static SCRIPT_STRING: LazyLock<Regex> = LazyLock::new(|| {
    compiled(r#""((?:[^"\\\r\n]|\\.)*)"|'((?:[^'\\\r\n]|\\.)*)'"#)
});

static SCRIPT_URL: LazyLock<Regex> = LazyLock::new(|| {
    compiled(r#"(?P<head>(?:\s+src\s*=|\s+href\s*=|\Wurl\()\s*\\?['"]?)(?P<url>.*?)(?P<tail>['")\\])"#)
});

fn compiled(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid built-in pattern {pattern}: {err}"),
    }
}

fn is_script_url(value: &str) -> bool {
    value
        .get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("javascript:"))
}

/// Rewrites every `url(...)` in a stylesheet. Values are re-emitted as
/// `url('<result>')`; `javascript:` values and values the rewriter declines
/// keep their original text.
pub fn rewrite_css(css: &str, rewriter: &mut dyn UrlRewriter) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let value = caps[1].trim().trim_matches('\'').trim_matches('"').trim();
            if value.is_empty() || is_script_url(value) {
                return caps[0].to_string();
            }
            match rewriter.rewrite_url(value, None) {
                Some(url) => format!("url('{url}')"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrites `src=`, `href=` and `url(` fragments found inside the string
/// literals of an inline script.
pub fn rewrite_script(script: &str, rewriter: &mut dyn UrlRewriter) -> String {
    SCRIPT_STRING
        .replace_all(script, |caps: &Captures| {
            let (delimiter, body) = match (caps.get(1), caps.get(2)) {
                (Some(body), _) => ('"', body.as_str()),
                (None, Some(body)) => ('\'', body.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            let body = SCRIPT_URL.replace_all(body, |url_caps: &Captures| {
                let value = &url_caps["url"];
                if value.is_empty() || is_script_url(value) {
                    return url_caps[0].to_string();
                }
                match rewriter.rewrite_url(value, None) {
                    Some(url) => format!("{}{}{}", &url_caps["head"], url, &url_caps["tail"]),
                    None => url_caps[0].to_string(),
                }
            });
            format!("{delimiter}{body}{delimiter}")
        })
        .into_owned()
}

/// Parses `html`, rewrites inline styles, inline scripts and URL-bearing
/// attributes, and serializes the document again.
pub fn rewrite_html(html: &str, rewriter: &mut dyn UrlRewriter) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len());
    for child in document.tree.root().children() {
        write_node(child, rewriter, &mut out);
    }
    out
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

/// Elements whose text children are serialized verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

fn write_node(node: NodeRef<'_, Node>, rewriter: &mut dyn UrlRewriter, out: &mut String) {
    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                write_node(child, rewriter, out);
            }
        }
        Node::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype.name());
            out.push('>');
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Text(text) => {
            let raw = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .is_some_and(|parent| RAW_TEXT_ELEMENTS.contains(&parent.name()));
            if raw {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        Node::Element(element) => write_element(node, element, rewriter, out),
        Node::ProcessingInstruction(_) => {}
    }
}

fn write_element(
    node: NodeRef<'_, Node>,
    element: &Element,
    rewriter: &mut dyn UrlRewriter,
    out: &mut String,
) {
    let name = element.name();
    out.push('<');
    out.push_str(name);
    let target = url_attribute(element);
    for (attr, value) in element.attrs() {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        let rewritten = match &target {
            Some((target_attr, hint)) if *target_attr == attr => {
                rewriter.rewrite_url(value.trim(), hint.as_deref())
            }
            _ => None,
        };
        escape_attribute(rewritten.as_deref().unwrap_or(value), out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    match inline_code(node, element) {
        Some(InlineCode::Style(css)) => out.push_str(&rewrite_css(&css, rewriter)),
        Some(InlineCode::Script(script)) => out.push_str(&rewrite_script(&script, rewriter)),
        None => {
            for child in node.children() {
                write_node(child, rewriter, out);
            }
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

enum InlineCode {
    Style(String),
    Script(String),
}

fn inline_code(node: NodeRef<'_, Node>, element: &Element) -> Option<InlineCode> {
    let declared = element
        .attr("type")
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    let make: fn(String) -> InlineCode = match (element.name(), declared.as_deref()) {
        ("style", None | Some("text/css")) => InlineCode::Style,
        ("script", None | Some("text/javascript" | "application/javascript")) => {
            InlineCode::Script
        }
        _ => return None,
    };
    if element.attr("src").is_some() {
        return None;
    }
    let text: String = node
        .children()
        .filter_map(|child| child.value().as_text().map(|text| String::from(&**text)))
        .collect();
    (!text.trim().is_empty()).then(|| make(text))
}

/// The attribute of `element` that carries a URL, with the content type
/// the markup declares for its target.
fn url_attribute(element: &Element) -> Option<(&'static str, Option<String>)> {
    let declared = || element.attr("type").map(str::to_string);
    let (attr, hint) = match element.name() {
        "link" => {
            let stylesheet = element.attr("rel").is_some_and(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            let hint = declared().or_else(|| stylesheet.then(|| "text/css".to_string()));
            ("href", hint)
        }
        "script" => (
            "src",
            Some(declared().unwrap_or_else(|| "application/javascript".to_string())),
        ),
        "img" | "iframe" => ("src", None),
        "video" | "audio" | "source" => ("src", declared()),
        "a" => {
            let href = element.attr("href")?;
            if href.trim_start().starts_with('#') {
                return None;
            }
            ("href", declared())
        }
        _ => return None,
    };
    let value = element.attr(attr)?;
    (!value.trim().is_empty()).then_some((attr, hint))
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Prefixes every URL with `out:` and records what it saw.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<(String, Option<String>)>,
    }

    impl UrlRewriter for Recorder {
        fn rewrite_url(&mut self, value: &str, hint: Option<&str>) -> Option<String> {
            self.seen.push((value.to_string(), hint.map(str::to_string)));
            if value.starts_with("mailto:") {
                return None;
            }
            Some(format!("out:{value}"))
        }
    }

    #[test]
    fn css_urls_are_requoted() {
        let mut recorder = Recorder::default();
        let css = r#"a { background: url("/img/a.png") } b { src: url( fonts/b.woff ) }"#;
        assert_eq!(
            rewrite_css(css, &mut recorder),
            "a { background: url('out:/img/a.png') } b { src: url('out:fonts/b.woff') }"
        );
    }

    #[test]
    fn css_script_urls_are_left_alone() {
        let mut recorder = Recorder::default();
        let css = "a { behavior: url(javascript:void(0)) }";
        assert_eq!(rewrite_css(css, &mut recorder), css);
        assert!(recorder.seen.is_empty());
    }

    #[test]
    fn script_urls_inside_strings_are_rewritten() {
        let mut recorder = Recorder::default();
        let script = r#"var html = '<img src="/img/x.png">'; var s = "a href=\"/p\""; var n = "src=/nope";"#;
        assert_eq!(
            rewrite_script(script, &mut recorder),
            r#"var html = '<img src="out:/img/x.png">'; var s = "a href=\"out:/p\""; var n = "src=/nope";"#
        );
    }

    #[test]
    fn script_url_calls_are_rewritten() {
        let mut recorder = Recorder::default();
        let script = r#"el.style.background = "none url('/bg.png')";"#;
        assert_eq!(
            rewrite_script(script, &mut recorder),
            r#"el.style.background = "none url('out:/bg.png')";"#
        );
    }

    #[test]
    fn html_attributes_carry_type_hints() {
        let mut recorder = Recorder::default();
        let html = concat!(
            r#"<html><head><link rel="stylesheet" href="/s.css">"#,
            r#"<script src="/app.js"></script></head>"#,
            r##"<body><a href="#top">top</a><a href="mailto:x@y.z">mail</a>"##,
            r#"<video src="/v.webm" type="video/webm"></video></body></html>"#,
        );
        let out = rewrite_html(html, &mut recorder);

        assert_eq!(
            recorder.seen,
            vec![
                ("/s.css".to_string(), Some("text/css".to_string())),
                ("/app.js".to_string(), Some("application/javascript".to_string())),
                ("mailto:x@y.z".to_string(), None),
                ("/v.webm".to_string(), Some("video/webm".to_string())),
            ]
        );
        assert!(out.contains(r#"<link rel="stylesheet" href="out:/s.css">"#));
        assert!(out.contains(r##"<a href="#top">top</a>"##));
        assert!(out.contains(r#"<a href="mailto:x@y.z">mail</a>"#));
    }

    #[test]
    fn inline_styles_and_scripts_are_rewritten_verbatim() {
        let mut recorder = Recorder::default();
        let html = concat!(
            "<html><head><style>p { background: url(/p.png) }</style>",
            "<script type=\"text/template\">'<img src=\"/t.png\">'</script>",
            "<script>if (a < b) { load('<img src=\"/i.png\">'); }</script>",
            "</head><body><p title=\"a &amp; &quot;b&quot;\">1 &lt; 2</p></body></html>",
        );
        let out = rewrite_html(html, &mut recorder);

        assert!(out.contains("<style>p { background: url('out:/p.png') }</style>"));
        assert!(out.contains("<script type=\"text/template\">'<img src=\"/t.png\">'</script>"));
        assert!(out.contains("if (a < b) { load('<img src=\"out:/i.png\">'); }"));
        assert!(out.contains("<p title=\"a &amp; &quot;b&quot;\">1 &lt; 2</p>"));
    }

    #[test]
    fn doctype_comments_and_void_elements_survive() {
        let mut recorder = Recorder::default();
        let html = "<!DOCTYPE html><html><head></head><body><!-- note --><br><img src=\"a.png\"></body></html>";
        assert_eq!(
            rewrite_html(html, &mut recorder),
            "<!DOCTYPE html><html><head></head><body><!-- note --><br><img src=\"out:a.png\"></body></html>"
        );
    }
}
