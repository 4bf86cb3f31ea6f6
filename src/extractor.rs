use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Path segment of Pinterest's click-tracking redirector
const TRACKING_MARKER: &str = "/email/click/";

/// Words that flag a link as a confirmation link
const KEYWORDS: [&str; 4] = ["confirm", "verify", "autologin", "activate"];

/// How many rounds of percent-decoding a tracking target may need
const MAX_DECODE_ROUNDS: usize = 4;

/// Extract the confirmation URL from an email body.
///
/// Accepted inputs:
/// - HTML bodies: `<a href="...">` anchors whose link mentions `/email/click/`,
///   `confirm`, `verify`, `autologin` or `activate`
/// - plain text: the same keywords on bare `http(s)://` URLs
///
/// A click-tracking link wins over other candidates, otherwise the first
/// candidate does. Tracking links are unwrapped to their `target` parameter.
pub fn extract_url(body: &str) -> Option<String> {
    let links = candidate_links(body);
    if links.is_empty() {
        debug!("No confirmation link found in body ({} bytes)", body.len());
        return None;
    }

    let chosen = links
        .iter()
        .find(|link| link.to_lowercase().contains(TRACKING_MARKER))
        .unwrap_or(&links[0]);

    let target = decode_target(chosen);
    debug!("Chose link {} -> {}", chosen, target);
    Some(target)
}

/// All links that look like confirmation links, in document order
pub fn candidate_links(body: &str) -> Vec<String> {
    let anchors = anchor_links(body);
    if !anchors.is_empty() {
        return anchors;
    }

    url_pattern()
        .find_iter(body)
        .map(|m| {
            m.as_str()
                .trim_end_matches(&['.', ',', ';', ':', '!', '?', ')'][..])
                .replace("&amp;", "&")
        })
        .filter(|url| is_confirmation_link(url))
        .collect()
}

/// Unwrap a click-tracking link to its `target` destination.
///
/// Links without a `target` parameter (or that are not valid URLs) are
/// returned unchanged.
pub fn decode_target(href: &str) -> String {
    let Ok(parsed) = Url::parse(href) else {
        return href.to_string();
    };

    let Some(mut target) = parsed
        .query_pairs()
        .find(|(key, value)| key == "target" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
    else {
        return href.to_string();
    };

    for _ in 0..MAX_DECODE_ROUNDS {
        let decoded = match urlencoding::decode(&target) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => break,
        };
        if decoded == target {
            break;
        }
        target = decoded;
    }

    target
}

fn anchor_links(body: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    Html::parse_document(body)
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::trim)
        .filter(|href| is_confirmation_link(href))
        .map(str::to_string)
        .collect()
}

fn is_confirmation_link(link: &str) -> bool {
    let lower = link.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }

    lower.contains(TRACKING_MARKER) || KEYWORDS.iter().any(|k| lower.contains(k))
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s"'<>]+"#).expect("static URL pattern is valid")
    })
}
