//! RMT / gil-seller spam filter.
//! Sellers space out or punctuate their keywords ("g u l d 2 v i p", "m.m.o.g.a.h")
//! to dodge plain matching, so every keyword matches either written solid or
//! with a separator between every one of its characters. A keyword split only
//! at a word break ("cheap, gil") is ordinary chat.

use regex::Regex;

const SPAM_KEYWORDS: &[&str] = &[
    "guld2vip",
    "gil2vip",
    "mmogah",
    "mmoah",
    "igvault",
    "u4gm",
    "lootbar",
    "gilsmart",
    "ffxivgil",
    "cheapgil",
    "buygil",
    "sellgil",
    "gilsale",
];

pub struct SpamFilter {
    pattern: Regex,
}

impl SpamFilter {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_keywords(SPAM_KEYWORDS)
    }

    pub fn with_keywords(keywords: &[&str]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = keywords
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| format!("{}|{}", solid(k), spaced(k)))
            .collect();
        let pattern = Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))?;
        Ok(Self { pattern })
    }

    pub fn is_spam(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

fn solid(keyword: &str) -> String {
    regex::escape(keyword)
}

/// `abc` -> `a[\W_]{1,3}b[\W_]{1,3}c`
fn spaced(keyword: &str) -> String {
    keyword
        .chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(r"[\W_]{1,3}")
}
