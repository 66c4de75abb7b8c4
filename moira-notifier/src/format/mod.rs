//! Message formatting for text channels.
//!
//! A message is laid out as
//!
//! ```text
//! <emoji> <STATE> <trigger name or link> [tag1][tag2]
//! <description>
//! <code fence>
//! HH:MM (GMT+hh:mm): <metric> = <values> (<old state> to <state>). <annotation>
//! <code fence>
//! ...and N more events.
//! <throttling notice>
//! ```
//!
//! and never exceeds the channel limit, counted in code points.

pub mod budget;
pub mod emoji;
pub mod markup;

use chrono_tz::Tz;

pub use budget::{SectionBudget, split};
pub use emoji::EmojiStyle;
pub use markup::{Markup, char_len, take_chars};

use crate::domain::{
    DEFAULT_TIME_FORMAT, DEFAULT_VALUE_FORMAT, NotificationEvent, TriggerData, ValueFormat,
    current_state,
};

/// Appended to the events of a throttled trigger.
pub const THROTTLE_NOTICE: &str =
    "\nPlease, fix your system or tune this trigger to generate less events.";

/// Replaces the end of a truncated description.
pub const DESCRIPTION_SUFFIX: &str = "...\n";

/// Rendering options shared by every message of one sender.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    pub front_url: String,
    pub location: Tz,
    pub date_time_format: String,
    pub markup: Markup,
    pub emoji: Option<EmojiStyle>,
    pub value_format: ValueFormat,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            front_url: String::new(),
            location: chrono_tz::UTC,
            date_time_format: DEFAULT_TIME_FORMAT.to_string(),
            markup: Markup::Plain,
            emoji: None,
            value_format: DEFAULT_VALUE_FORMAT,
        }
    }
}

impl FormatterConfig {
    pub fn new(front_url: impl Into<String>, location: Tz, date_time_format: impl Into<String>) -> Self {
        Self {
            front_url: front_url.into(),
            location,
            date_time_format: date_time_format.into(),
            ..Default::default()
        }
    }

    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = markup;
        self
    }

    pub fn with_emoji(mut self, emoji: EmojiStyle) -> Self {
        self.emoji = Some(emoji);
        self
    }
}

/// Builds channel texts within a character limit.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    config: FormatterConfig,
}

impl MessageFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    /// Full message text, at most `limit` code points long.
    pub fn format(
        &self,
        events: &[NotificationEvent],
        trigger: &TriggerData,
        throttled: bool,
        limit: usize,
    ) -> String {
        let markup = self.config.markup;
        let header = self.title(events, trigger, throttled);
        let tags = self.tags(&trigger.tags, None);
        let desc = self.description(&trigger.desc, None);
        let events_block = self.events_block(events, throttled, None);

        let full = SectionBudget {
            tags: char_len(&tags),
            desc: char_len(&desc),
            events: char_len(&events_block),
        };
        let budget = limit.saturating_sub(char_len(&header) + 1);
        let granted = split(budget, full, self.events_minimum(events, throttled));

        let tags = if granted.tags < full.tags {
            self.tags(&trigger.tags, Some(granted.tags))
        } else {
            tags
        };
        let desc = if granted.desc < full.desc {
            self.description(&trigger.desc, Some(granted.desc))
        } else {
            desc
        };
        let events_block = if granted.events < full.events {
            self.events_block(events, throttled, Some(granted.events))
        } else {
            events_block
        };

        let message = format!("{}{}\n{}{}", header, tags, desc, events_block);
        if char_len(&message) > limit {
            markup.balanced_prefix(&message, limit)
        } else {
            message
        }
    }

    /// `<emoji> <STATE> <name or link>`.
    pub fn title(&self, events: &[NotificationEvent], trigger: &TriggerData, throttled: bool) -> String {
        let markup = self.config.markup;
        let state = current_state(events, throttled);
        let name = markup.escape(&trigger.name);
        let name = match trigger.trigger_uri(&self.config.front_url) {
            Some(uri) => markup.link(&uri, &name),
            None => name,
        };
        let bold = markup.bold(state.as_ref());
        match self.config.emoji {
            Some(emoji) => format!("{} {} {}", emoji.for_state(state), bold, name),
            None => format!("{} {}", bold, name),
        }
    }

    /// Markup-free one-line summary, for mail subjects and push titles.
    pub fn subject(&self, events: &[NotificationEvent], trigger: &TriggerData, throttled: bool) -> String {
        let state = current_state(events, throttled);
        let tags = trigger.tags_string();
        if tags.is_empty() {
            format!("{} {}", state, trigger.name)
        } else {
            format!("{} {} {}", state, trigger.name, tags)
        }
    }

    /// One event line, starting with a newline.
    pub fn event_line(&self, event: &NotificationEvent) -> String {
        let markup = self.config.markup;
        let mut line = format!(
            "\n{}: {} = {} ({} to {})",
            event.format_timestamp(&self.config.location, &self.config.date_time_format),
            markup.escape(event.display_metric()),
            markup.escape(&event.metric_values(&self.config.value_format)),
            event.old_state,
            event.state,
        );
        if let Some(annotation) = event.annotation() {
            line.push_str(". ");
            line.push_str(&markup.escape(annotation));
        }
        line
    }

    /// ` [tag1][tag2]`, keeping whole tags left to right within `limit`.
    fn tags(&self, tags: &[String], limit: Option<usize>) -> String {
        if tags.is_empty() {
            return String::new();
        }
        let markup = self.config.markup;
        let mut out = String::from(" ");
        let mut used = 1;
        for tag in tags {
            let token = format!("[{}]", markup.escape(tag));
            let len = char_len(&token);
            if limit.is_some_and(|max| used + len > max) {
                break;
            }
            out.push_str(&token);
            used += len;
        }
        if used == 1 { String::new() } else { out }
    }

    /// The description followed by a newline, truncated with `...\n` past `limit`.
    fn description(&self, desc: &str, limit: Option<usize>) -> String {
        if desc.is_empty() {
            return String::new();
        }
        let markup = self.config.markup;
        let escaped = markup.escape(desc);
        match limit {
            None => format!("{}\n", escaped),
            Some(max) if max < char_len(DESCRIPTION_SUFFIX) => String::new(),
            Some(max) => {
                let keep = max - char_len(DESCRIPTION_SUFFIX);
                format!("{}{}", markup.safe_prefix(&escaped, keep), DESCRIPTION_SUFFIX)
            }
        }
    }

    /// Code-fenced event lines, a tail counting omitted events, and the
    /// throttling notice.
    fn events_block(&self, events: &[NotificationEvent], throttled: bool, limit: Option<usize>) -> String {
        let markup = self.config.markup;
        let notice = if throttled { THROTTLE_NOTICE } else { "" };
        let budget = limit.map(|max| max.saturating_sub(char_len(notice)));
        let closing = char_len(markup.code_end()) + 1;

        let mut block = String::from(markup.code_start());
        let mut block_len = char_len(&block);
        let mut tail = None;

        for (printed, event) in events.iter().enumerate() {
            let line = self.event_line(event);
            let line_len = char_len(&line);
            if let Some(max) = budget {
                let pending_tail = omitted_tail(events.len() - printed);
                if block_len + line_len + closing + char_len(&pending_tail) > max {
                    tail = Some(pending_tail);
                    break;
                }
            }
            block.push_str(&line);
            block_len += line_len;
        }

        block.push('\n');
        block.push_str(markup.code_end());
        if let Some(tail) = tail {
            block.push_str(&tail);
        }
        block.push_str(notice);
        block
    }

    /// Length of an events block showing only its first line.
    fn events_minimum(&self, events: &[NotificationEvent], throttled: bool) -> usize {
        let first = events.first().map(|e| char_len(&self.event_line(e))).unwrap_or(0);
        let markup = self.config.markup;
        char_len(markup.code_start())
            + first
            + 1
            + char_len(markup.code_end())
            + char_len(&omitted_tail(events.len()))
            + if throttled { char_len(THROTTLE_NOTICE) } else { 0 }
    }
}

fn omitted_tail(count: usize) -> String {
    format!("\n...and {} more events.", count)
}
