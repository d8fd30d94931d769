/// Inject the live-update client runtime into an HTML artifact. Placed just
/// before `</head>` when present, falling back to `</body>`, else appended.
pub fn inject_client_script(html: &str) -> String {
    const CLIENT_JS: &str = include_str!("client.js");

    let script_tag = format!("<script>{}</script>", CLIENT_JS);

    if let Some(pos) = html.find("</head>") {
        let mut result = String::with_capacity(html.len() + script_tag.len());
        result.push_str(&html[..pos]);
        result.push_str(&script_tag);
        result.push_str(&html[pos..]);
        result
    } else if let Some(pos) = html.find("</body>") {
        let mut result = String::with_capacity(html.len() + script_tag.len());
        result.push_str(&html[..pos]);
        result.push_str(&script_tag);
        result.push_str(&html[pos..]);
        result
    } else {
        format!("{}{}", html, script_tag)
    }
}
