use quick_xml::de::DeError;
use serde::Deserialize;

/// A decoded RSS 2.0 channel. Lives only for one feed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Items in document order
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw `<pubDate>` text; resolved later by [`crate::feed::timestamp`]
    pub pub_date: String,
}

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

// The serde decoder matches element names without their namespace prefix,
// so `<atom:link>` lands on `link` and `<itunes:title>` on `title`. Text
// fields are collected as lists and the first non-blank value wins.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssChannel {
    #[serde(rename = "title")]
    titles: Vec<RssText>,
    #[serde(rename = "link")]
    links: Vec<RssText>,
    #[serde(rename = "description")]
    descriptions: Vec<RssText>,
    #[serde(rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssItem {
    #[serde(rename = "title")]
    titles: Vec<RssText>,
    #[serde(rename = "link")]
    links: Vec<RssText>,
    #[serde(rename = "description")]
    descriptions: Vec<RssText>,
    #[serde(rename = "pubDate")]
    pub_dates: Vec<RssText>,
}

/// Text content of an element; attributes such as `href` are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssText {
    #[serde(rename = "$text")]
    text: String,
}

fn first_text(values: Vec<RssText>) -> String {
    values
        .into_iter()
        .map(|v| v.text)
        .find(|text| !text.trim().is_empty())
        .unwrap_or_default()
}

/// Decode an RSS 2.0 document.
///
/// Titles and descriptions are HTML-unescaped after XML decoding, since many
/// feeds escape their markup twice (`&amp;amp;`, `&amp;lt;p&amp;gt;`).
pub fn parse_rss(bytes: &[u8]) -> Result<FeedDocument, DeError> {
    let document: RssDocument = quick_xml::de::from_reader(bytes)?;
    let channel = document.channel;

    Ok(FeedDocument {
        title: unescape_html(&first_text(channel.titles)),
        link: first_text(channel.links).trim().to_string(),
        description: unescape_html(&first_text(channel.descriptions)),
        items: channel
            .items
            .into_iter()
            .map(|item| FeedItem {
                title: unescape_html(&first_text(item.titles)),
                link: first_text(item.links).trim().to_string(),
                description: unescape_html(&first_text(item.descriptions)),
                pub_date: first_text(item.pub_dates),
            })
            .collect(),
    })
}

/// Longest entity reference tried, `&` and `;` included.
const MAX_ENTITY_LEN: usize = 32;

/// Decode every well-formed entity (`&amp;`, `&#39;`, `&#x27;`) in `text`.
///
/// Anything that is not a known entity, such as the bare `&` in "Q&A", is
/// copied through unchanged.
fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match entity_len(rest).and_then(|len| {
            htmlescape::decode_html(&rest[..len])
                .ok()
                .map(|decoded| (decoded, len))
        }) {
            Some((decoded, len)) => {
                out.push_str(&decoded);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of the `&name;` or `&#digits;` reference at the start of `s`.
fn entity_len(s: &str) -> Option<usize> {
    let body_len = s[1..]
        .bytes()
        .take(MAX_ENTITY_LEN - 2)
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'#')
        .count();
    if body_len == 0 || s.as_bytes().get(body_len + 1) != Some(&b';') {
        return None;
    }
    Some(body_len + 2)
}
