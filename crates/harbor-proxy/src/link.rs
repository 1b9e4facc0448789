//! `Link` header parsing for paginated Harbor API responses

use reqwest::header::{HeaderMap, LINK};

/// Return the target of the first `rel="next"` relation found in any `Link` header
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(parse_next)
}

/// Parse a single `Link` header value: `<uri>; rel="prev", <uri>; rel="next"`
fn parse_next(header: &str) -> Option<String> {
    for link in header.split(',') {
        let mut params = link.split(';');
        let target = params.next()?.trim();
        let Some(uri) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
            continue;
        };

        let is_next = params.any(|param| {
            let Some((key, value)) = param.split_once('=') else {
                return false;
            };
            key.trim().eq_ignore_ascii_case("rel")
                && value
                    .trim()
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });

        if is_next {
            return Some(uri.to_string());
        }
    }
    None
}
