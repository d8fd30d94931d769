use axum::http::{Response, StatusCode};

use crate::pipeline::Diagnostic;

pub fn error_response(message: impl Into<String>, code: StatusCode) -> Response<String> {
    Response::builder()
        .status(code)
        .body(message.into())
        .unwrap()
}

/// Render build diagnostics as a development error page. Served with `200`
/// so the browser shows the page instead of its own error screen.
pub fn error_page(title: &str, diagnostics: &[Diagnostic]) -> String {
    let mut entries = String::new();
    for diagnostic in diagnostics {
        let location = diagnostic
            .file
            .as_deref()
            .map(|f| format!("<div class=\"file\">{}</div>", escape_html(f)))
            .unwrap_or_default();
        entries.push_str(&format!(
            "<li>{}<pre>{}</pre></li>",
            location,
            escape_html(&diagnostic.message)
        ));
    }

    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>body{{background:#111;color:#eee;font-family:monospace;padding:2rem}}\
         h1{{color:#ff5555}}li{{margin-bottom:1rem;list-style:none}}\
         .file{{color:#8be9fd}}pre{{white-space:pre-wrap}}</style>\
         </head><body><h1>{title}</h1><ul>{entries}</ul></body></html>",
        title = escape_html(title),
        entries = entries
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_page_escapes_markup() {
        let page = error_page(
            "Build failed",
            &[Diagnostic::in_file("unexpected token <div>", "src/app.js")],
        );
        assert!(page.contains("unexpected token &lt;div&gt;"));
        assert!(page.contains("src/app.js"));
        assert!(!page.contains("token <div>"));
    }
}
