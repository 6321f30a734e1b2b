//! Keyword search over the messages of the active chunk.
//!
//! Queries mix `key: value` filters with free text, e.g.
//! `from: ana has: png before: 2021-06-01 "exact words"`. Quoted values may
//! contain spaces. Unknown keys match their value against message content.
//! Everything is case-insensitive and a plain linear scan.

use anyhow::{Result, bail};
use regex::Regex;
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::model::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    From(String),
    Mentions(String),
    Has(String),
    Before(OffsetDateTime),
    During(Date),
    After(OffsetDateTime),
    Pinned(bool),
    /// Any other key: its value must appear in the content.
    Content(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    /// Free text left after removing the filters.
    pub text: String,
    /// Newest results first.
    pub reverse: bool,
}

fn pair_regex() -> &'static Regex {
    static PAIR_RE: OnceLock<Regex> = OnceLock::new();
    PAIR_RE.get_or_init(|| {
        Regex::new(r#"(\w+):\s*(?:"([^"]*)"|(\S+))"#).expect("valid search pair regex")
    })
}

/// `2021-06-01` is midnight UTC; full RFC 3339 timestamps are accepted too.
fn parse_instant(value: &str) -> Result<OffsetDateTime> {
    if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(instant);
    }
    let date = parse_date(value)?;
    Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

fn parse_date(value: &str) -> Result<Date> {
    if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(instant.date());
    }
    match Date::parse(value, format_description!("[year]-[month]-[day]")) {
        Ok(date) => Ok(date),
        Err(_) => bail!("invalid date {value:?}: expected YYYY-MM-DD"),
    }
}

impl Query {
    pub fn parse(input: &str) -> Result<Self> {
        let lowered = input.trim().to_lowercase();
        let mut query = Query::default();

        for caps in pair_regex().captures_iter(&lowered) {
            let key = &caps[1];
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let filter = match key {
                "from" => Filter::From(value),
                "mentions" => Filter::Mentions(value),
                "has" => Filter::Has(value),
                "before" => Filter::Before(parse_instant(&value)?),
                "during" => Filter::During(parse_date(&value)?),
                "after" => Filter::After(parse_instant(&value)?),
                "pinned" => Filter::Pinned(value == "true"),
                "reverse" => {
                    query.reverse = value == "true";
                    continue;
                }
                _ => Filter::Content(value),
            };
            query.filters.push(filter);
        }

        let rest = pair_regex().replace_all(&lowered, " ");
        query.text = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(query)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.text.is_empty()
    }

    pub fn matches(&self, message: &Message) -> bool {
        let content = message.content.to_lowercase();
        if !self.text.is_empty() && !content.contains(&self.text) {
            return false;
        }
        self.filters.iter().all(|filter| match filter {
            Filter::From(name) => message.author.name.to_lowercase().contains(name.as_str()),
            Filter::Mentions(name) => message
                .mentions
                .iter()
                .any(|mention| mention.name.to_lowercase() == *name),
            Filter::Has(needle) => {
                content.contains(needle.as_str())
                    || message
                        .attachments
                        .iter()
                        .any(|att| att.url.to_lowercase().contains(needle.as_str()))
            }
            Filter::Before(limit) => sent_at(message).is_some_and(|at| at < *limit),
            Filter::During(day) => sent_at(message).is_some_and(|at| at.date() == *day),
            Filter::After(limit) => sent_at(message).is_some_and(|at| at > *limit),
            Filter::Pinned(pinned) => message.is_pinned == *pinned,
            Filter::Content(needle) => content.contains(needle.as_str()),
        })
    }
}

fn sent_at(message: &Message) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(&message.timestamp, &Rfc3339)
        .ok()
        .map(|at| at.to_offset(time::UtcOffset::UTC))
}

/// Messages of `messages` matching `query`, oldest first unless reversed.
pub fn search<'a>(messages: &'a [Message], query: &Query) -> Vec<&'a Message> {
    let mut results: Vec<&Message> = messages.iter().filter(|m| query.matches(m)).collect();
    if query.reverse {
        results.reverse();
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, Author};
    use crate::test_utils::numbered_messages;

    fn ids(results: &[&Message]) -> Vec<String> {
        results.iter().map(|m| m.id.clone()).collect()
    }

    fn fixture() -> Vec<Message> {
        let mut messages = numbered_messages(5);
        messages[0].content = "Hello World".to_string();
        messages[0].timestamp = "2021-05-30T10:00:00+00:00".to_string();
        messages[1].content = "see attached".to_string();
        messages[1].timestamp = "2021-06-01T09:00:00+00:00".to_string();
        messages[1].attachments.push(Attachment {
            url: "https://cdn.example/Cat.PNG".to_string(),
            file_name: "Cat.PNG".to_string(),
            ..Default::default()
        });
        messages[2].content = "hello again, world".to_string();
        messages[2].timestamp = "2021-06-01T23:30:00+00:00".to_string();
        messages[2].is_pinned = true;
        messages[2].mentions.push(Author {
            name: "Ana".to_string(),
            ..Default::default()
        });
        messages[3].author.name = "Ana".to_string();
        messages[3].content = "hello world".to_string();
        messages[3].timestamp = "2021-06-02T00:00:00+00:00".to_string();
        messages[4].author.name = "anabel".to_string();
        messages[4].content = "bye".to_string();
        messages[4].timestamp = "2021-06-03T12:00:00+00:00".to_string();
        messages
    }

    fn run(query: &str) -> Vec<String> {
        let messages = fixture();
        let query = Query::parse(query).unwrap();
        ids(&search(&messages, &query))
    }

    #[test]
    fn parse_splits_filters_and_text() {
        let query = Query::parse(r#"From: Ana  hello   has: "cat png" there reverse: true"#).unwrap();
        assert_eq!(
            query.filters,
            vec![Filter::From("ana".into()), Filter::Has("cat png".into())]
        );
        assert_eq!(query.text, "hello there");
        assert!(query.reverse);
    }

    #[test]
    fn free_text_is_case_insensitive_substring() {
        assert_eq!(run("HELLO world"), vec!["1", "4"]);
        assert_eq!(run("world"), vec!["1", "3", "4"]);
    }

    #[test]
    fn from_matches_author_substring() {
        assert_eq!(run("from: ana"), vec!["4", "5"]);
        assert_eq!(run("from: anabel"), vec!["5"]);
    }

    #[test]
    fn mentions_match_exact_name() {
        assert_eq!(run("mentions: ana"), vec!["3"]);
        assert!(run("mentions: an").is_empty());
    }

    #[test]
    fn has_checks_attachment_urls_and_content() {
        assert_eq!(run("has: png"), vec!["2"]);
        assert_eq!(run("has: again"), vec!["3"]);
    }

    #[test]
    fn date_filters() {
        assert_eq!(run("before: 2021-06-01"), vec!["1"]);
        assert_eq!(run("during: 2021-06-01"), vec!["2", "3"]);
        assert_eq!(run("after: 2021-06-02"), vec!["5"]);
        assert_eq!(run("after: 2021-06-01 before: 2021-06-03"), vec!["2", "3", "4"]);
    }

    #[test]
    fn pinned_and_reverse() {
        assert_eq!(run("pinned: true"), vec!["3"]);
        assert_eq!(run("pinned: false hello"), vec!["1", "4"]);
        assert_eq!(run("hello reverse: true"), vec!["4", "3", "1"]);
    }

    #[test]
    fn unknown_key_searches_content() {
        assert_eq!(run("in: bye"), vec!["5"]);
    }

    #[test]
    fn invalid_date_is_an_error() {
        let err = Query::parse("before: yesterday").unwrap_err();
        assert!(err.to_string().contains("invalid date"));
    }

    #[test]
    fn empty_query_matches_everything() {
        let query = Query::parse("   ").unwrap();
        assert!(query.is_empty());
        assert_eq!(search(&fixture(), &query).len(), 5);
    }
}
