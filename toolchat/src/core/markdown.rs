//! Markdown-lite rendering of finished bot output into HTML markup.
//!
//! Not a markdown parser: a fixed sequence of line and
//! inline substitutions. It never fails, so it is safe to call on every
//! streamed prefix; an unclosed fence simply renders as plain text until the
//! closing fence arrives.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)```").unwrap());
static H3_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^### (.+)$").unwrap());
static H2_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^## (.+)$").unwrap());
static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[-*] (.+)$").unwrap());
static ORDERED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\. (.*)$").unwrap());

/// Render `text` to markup. Input is HTML-escaped first.
pub fn render(text: &str) -> String {
    let escaped = html_escape::encode_text(text);
    let mut out = BOLD_RE
        .replace_all(&escaped, "<strong>${1}</strong>")
        .into_owned();
    out = replace(&ITALIC_RE, &out, "<em>${1}</em>");
    out = replace(&INLINE_CODE_RE, &out, "<code>${1}</code>");
    out = FENCE_RE
        .replace_all(&out, |caps: &Captures<'_>| {
            let lang = &caps[1];
            if lang.is_empty() {
                format!("<pre><code>{}</code></pre>", &caps[2])
            } else {
                format!("<pre><code class=\"language-{lang}\">{}</code></pre>", &caps[2])
            }
        })
        .into_owned();
    out = replace(&H3_RE, &out, "<h3>${1}</h3>");
    out = replace(&H2_RE, &out, "<h2>${1}</h2>");
    out = replace(&H1_RE, &out, "<h1>${1}</h1>");
    out = replace(&BULLET_RE, &out, "<li>${1}</li>");
    renumber_ordered(&out)
}

fn replace(re: &Regex, text: &str, replacement: &str) -> String {
    match re.replace_all(text, replacement) {
        Cow::Borrowed(_) => text.to_string(),
        Cow::Owned(owned) => owned,
    }
}

/// Number ordered-list lines by how many ordered-list lines precede them,
/// ignoring whatever numbers the author wrote.
fn renumber_ordered(text: &str) -> String {
    let mut count = 0usize;
    text.split('\n')
        .map(|line| match ORDERED_RE.captures(line) {
            Some(caps) => {
                count += 1;
                format!("<li class=\"ordered\">{count}. {}</li>", &caps[1])
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_and_italics() {
        assert_eq!(render("**x**"), "<strong>x</strong>");
        assert_eq!(render("an *aside* here"), "an <em>aside</em> here");
        assert_eq!(
            render("**bold** and *it*"),
            "<strong>bold</strong> and <em>it</em>"
        );
    }

    #[test]
    fn inline_and_fenced_code() {
        assert_eq!(render("run `ls -la` now"), "run <code>ls -la</code> now");
        assert_eq!(
            render("```rust\nfn main() {}\n```"),
            "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"
        );
        assert_eq!(
            render("```\nplain\n```"),
            "<pre><code>plain\n</code></pre>"
        );
    }

    #[test]
    fn headings_and_bullets() {
        assert_eq!(
            render("# One\n## Two\n### Three"),
            "<h1>One</h1>\n<h2>Two</h2>\n<h3>Three</h3>"
        );
        assert_eq!(render("- a\n* b"), "<li>a</li>\n<li>b</li>");
    }

    #[test]
    fn ordered_lists_renumber_from_one() {
        let rendered = render("5. foo\n3. bar");
        assert_eq!(
            rendered,
            "<li class=\"ordered\">1. foo</li>\n<li class=\"ordered\">2. bar</li>"
        );
    }

    #[test]
    fn escapes_html_in_input() {
        assert_eq!(render("<b>&</b>"), "&lt;b&gt;&amp;&lt;/b&gt;");
    }

    #[test]
    fn streamed_prefixes_never_panic() {
        let full = "# Title\n**bold** then `code`\n```sh\necho hi\n```\n1. one\n2. two\n";
        for end in 0..=full.len() {
            if full.is_char_boundary(end) {
                let _ = render(&full[..end]);
            }
        }
        assert!(render("```sh\nunclosed").contains("```sh"));
    }
}
