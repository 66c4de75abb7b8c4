//! Markup flavours of the supported channels.

use serde::{Deserialize, Serialize};

/// How a channel renders emphasis, links and code blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Markup {
    /// No markup at all.
    Plain,
    /// CommonMark-style markdown (Discord, Mattermost).
    Markdown,
    /// Telegram's HTML subset.
    Html,
    /// Slack mrkdwn.
    Slack,
}

impl Markup {
    pub fn bold(self, text: &str) -> String {
        match self {
            Self::Plain => text.to_string(),
            Self::Markdown => format!("**{}**", text),
            Self::Html => format!("<b>{}</b>", text),
            Self::Slack => format!("*{}*", text),
        }
    }

    /// A hyperlink; `text` must already be escaped.
    pub fn link(self, uri: &str, text: &str) -> String {
        match self {
            Self::Plain => format!("{} {}", text, uri),
            Self::Markdown => format!("[{}]({})", text, uri),
            Self::Html => format!("<a href=\"{}\">{}</a>", escape_html(uri), text),
            Self::Slack => format!("<{}|{}>", uri, text),
        }
    }

    pub fn code_start(self) -> &'static str {
        match self {
            Self::Plain => "",
            Self::Markdown | Self::Slack => "```",
            Self::Html => "<pre>",
        }
    }

    pub fn code_end(self) -> &'static str {
        match self {
            Self::Plain => "",
            Self::Markdown | Self::Slack => "```",
            Self::Html => "</pre>",
        }
    }

    /// Escape user text for this flavour.
    pub fn escape(self, text: &str) -> String {
        match self {
            Self::Plain | Self::Markdown => text.to_string(),
            Self::Html | Self::Slack => escape_html(text),
        }
    }

    /// The first `max` code points of already escaped text, backing off so an
    /// entity such as `&amp;` is never cut in half.
    pub fn safe_prefix(self, text: &str, max: usize) -> String {
        let prefix = take_chars(text, max);
        if !matches!(self, Self::Html | Self::Slack) {
            return prefix;
        }
        match (prefix.rfind('&'), prefix.rfind(';')) {
            (Some(amp), Some(semi)) if semi > amp => prefix,
            (Some(amp), _) if text.len() > prefix.len() && text[amp..].contains(';') => {
                prefix[..amp].to_string()
            }
            _ => prefix,
        }
    }

    /// [`Markup::safe_prefix`] that also backs off past any tag, link or
    /// code fence it would leave open.
    pub fn balanced_prefix(self, text: &str, max: usize) -> String {
        let mut prefix = self.safe_prefix(text, max);
        let mut keep = prefix.len();
        if matches!(self, Self::Html | Self::Slack) {
            keep = closed_angles_len(&prefix, self == Self::Html);
        }
        if matches!(self, Self::Markdown | Self::Slack) {
            keep = closed_fences_len(&prefix[..keep], self.code_start());
        }
        prefix.truncate(keep);
        prefix
    }
}

/// Byte length of the longest prefix of `text` with no `<` left unclosed.
/// With `paired`, every opening tag also needs its closing tag.
fn closed_angles_len(text: &str, paired: bool) -> usize {
    let mut open: Vec<usize> = Vec::new();
    let mut pos = 0;
    while let Some(found) = text[pos..].find('<') {
        let start = pos + found;
        let Some(len) = text[start..].find('>') else {
            return open.first().copied().unwrap_or(start);
        };
        if paired {
            if text[start + 1..].starts_with('/') {
                open.pop();
            } else {
                open.push(start);
            }
        }
        pos = start + len + 1;
    }
    open.first().copied().unwrap_or(text.len())
}

/// Byte length of the longest prefix of `text` in which code fences pair up.
fn closed_fences_len(text: &str, fence: &str) -> usize {
    let ticks = text.len() - text.trim_end_matches('`').len();
    let text = &text[..text.len() - ticks % fence.len()];
    let fences: Vec<usize> = text.match_indices(fence).map(|(at, _)| at).collect();
    match fences.last() {
        Some(&last) if fences.len() % 2 == 1 => last,
        _ => text.len(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Number of code points in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The first `max` code points of `text`.
pub fn take_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
