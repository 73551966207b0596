//! HTML document shell.
//!
//! Wraps rendered page markup with:
//! - merged `<title>`, `<meta>` and `<link>` tags
//! - `<link rel="modulepreload">` for critical chunks
//! - the inline islands manifest and its integrity digest
//! - the dev client preamble (when the manifest names one) and the runtime script

use std::fmt::Write;

use crate::island::Markup;
use crate::manifest::ManifestProvider;
use crate::route::{Head, TagAttrs};
use crate::serialize::{escape_html_attribute, escape_html_text};

/// `id` of the inline manifest `<script>`.
pub const MANIFEST_ELEMENT_ID: &str = "islands-manifest";

/// Manifest field naming the dev server's client preamble.
pub const PREAMBLE_FIELD: &str = "vite-client";

pub const DEFAULT_TITLE: &str = "React Islands";

/// Everything the shell needs for one response.
#[derive(Debug, Clone, Copy)]
pub struct DocumentParts<'a> {
    pub head: &'a Head,
    pub body: &'a Markup,
    pub manifest: &'a ManifestProvider,
    /// Chunk locators to preload ahead of the runtime.
    pub modulepreload: &'a [String],
}

/// Render a complete `<!DOCTYPE html>` document.
pub fn render_document(parts: &DocumentParts<'_>) -> String {
    let mut html = String::with_capacity(parts.body.as_str().len() + 1024);
    let manifest = parts.manifest.manifest();
    let title = parts
        .head
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"utf-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
    );
    // Writing to a String cannot fail.
    let _ = writeln!(html, "    <title>{}</title>", escape_html_text(title));

    for meta in &parts.head.meta {
        let _ = writeln!(html, "    <meta{}>", render_attrs(meta));
    }
    for link in &parts.head.links {
        let _ = writeln!(html, "    <link{}>", render_attrs(link));
    }
    for chunk in parts.modulepreload {
        let _ = writeln!(
            html,
            r#"    <link rel="modulepreload" href="{}">"#,
            escape_html_attribute(chunk)
        );
    }

    html.push_str(r#"    <script type="application/json" id=""#);
    html.push_str(MANIFEST_ELEMENT_ID);
    html.push('"');
    if let Some(integrity) = parts.manifest.integrity() {
        let _ = write!(html, r#" data-integrity="{}""#, escape_html_attribute(integrity));
    }
    let _ = writeln!(html, ">{}</script>", parts.manifest.manifest_json());

    if let Some(preamble) = manifest.field(PREAMBLE_FIELD) {
        let _ = writeln!(
            html,
            r#"    <script type="module" src="{}"></script>"#,
            escape_html_attribute(preamble)
        );
    }
    let _ = writeln!(
        html,
        r#"    <script type="module" src="{}"></script>"#,
        escape_html_attribute(manifest.runtime_src())
    );

    html.push_str("</head>\n<body>\n");
    let _ = writeln!(html, "    <div id=\"app\">{}</div>", parts.body);
    html.push_str("</body>\n</html>\n");
    html
}

/// Generic page for failed renders. Leaks no error detail.
pub fn render_error_document() -> String {
    concat!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n",
        "    <meta charset=\"utf-8\">\n",
        "    <title>Something went wrong</title>\n",
        "</head>\n<body>\n",
        "    <h1>Something went wrong</h1>\n",
        "</body>\n</html>\n",
    )
    .to_string()
}

fn render_attrs(attrs: &TagAttrs) -> String {
    let mut out = String::new();
    for (name, value) in attrs {
        if !is_valid_attr_name(name) {
            continue;
        }
        let _ = write!(out, r#" {}="{}""#, name, escape_html_attribute(value));
    }
    out
}

fn is_valid_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}
