//! HTML escaping for transcript content.

/// Named-entity replacement for a single character, if it has one.
///
/// Covers the markup-significant characters plus the accented Latin-1
/// letters and symbols the transcript viewer expects as named entities.
fn entity(c: char) -> Option<&'static str> {
    let e = match c {
        '<' => "&lt;",
        '>' => "&gt;",
        '&' => "&amp;",
        '"' => "&quot;",
        'à' => "&agrave;",
        'À' => "&Agrave;",
        'â' => "&acirc;",
        'Â' => "&Acirc;",
        'ä' => "&auml;",
        'Ä' => "&Auml;",
        'å' => "&aring;",
        'Å' => "&Aring;",
        'æ' => "&aelig;",
        'Æ' => "&AElig;",
        'ç' => "&ccedil;",
        'Ç' => "&Ccedil;",
        'é' => "&eacute;",
        'É' => "&Eacute;",
        'è' => "&egrave;",
        'È' => "&Egrave;",
        'ê' => "&ecirc;",
        'Ê' => "&Ecirc;",
        'ë' => "&euml;",
        'Ë' => "&Euml;",
        'ï' => "&iuml;",
        'Ï' => "&Iuml;",
        'ô' => "&ocirc;",
        'Ô' => "&Ocirc;",
        'ö' => "&ouml;",
        'Ö' => "&Ouml;",
        'ø' => "&oslash;",
        'Ø' => "&Oslash;",
        'ß' => "&szlig;",
        'ù' => "&ugrave;",
        'Ù' => "&Ugrave;",
        'û' => "&ucirc;",
        'Û' => "&Ucirc;",
        'ü' => "&uuml;",
        'Ü' => "&Uuml;",
        '®' => "&reg;",
        '©' => "&copy;",
        '€' => "&euro;",
        _ => return None,
    };
    Some(e)
}

/// Escape `text` one character at a time, left to right.
/// Characters without an entity pass through unchanged.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match entity(c) {
            Some(e) => out.push_str(e),
            None => out.push(c),
        }
    }
    out
}

/// Escape text for a single-quoted attribute value.
pub fn escape_attribute(text: &str) -> String {
    escape_html(text).replace('\'', "&#39;")
}
