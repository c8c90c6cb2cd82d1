use anyhow::{Context, Result};
use regex::Regex;

pub const MAX_NORMALIZED_CHARS: usize = 100;

const BOILERPLATE_PREFIXES: &[&str] = &[
    "search for",
    "search",
    "what is a",
    "what is an",
    "what is the",
    "what is",
    "what are the",
    "what are",
    "what causes",
    "how do i",
    "how do you",
    "how does",
    "how to",
    "how is",
    "definition of",
    "meaning of",
    "pathology of",
];

const URL_SCHEMES: &[&str] = &["https://", "http://"];

const HYPHENS: &[char] = &['-', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}'];

#[derive(Debug, Clone)]
pub struct Normalizer {
    stripped_chars: Regex,
    prefixes: Vec<String>,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        let stripped_chars = Regex::new(r"[^\p{L}\p{M}\p{N}\s]+")
            .context("failed to compile normalizer character class")?;

        let mut prefixes = BOILERPLATE_PREFIXES
            .iter()
            .map(|value| (*value).to_string())
            .collect::<Vec<String>>();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        Ok(Self {
            stripped_chars,
            prefixes,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let mut text = raw.to_lowercase();

        for scheme in URL_SCHEMES {
            text = text.replace(scheme, "");
        }

        text = text.replace(HYPHENS, " ");
        let text = self.stripped_chars.replace_all(&text, "");
        let text = collapse_whitespace(&text);
        let text = self.strip_prefixes(text);

        truncate_chars(&text, MAX_NORMALIZED_CHARS)
    }

    fn strip_prefixes(&self, mut text: String) -> String {
        loop {
            let Some(rest) = self
                .prefixes
                .iter()
                .find_map(|prefix| strip_word_prefix(&text, prefix))
            else {
                return text;
            };

            // A query that is nothing but boilerplate keeps its words.
            if rest.is_empty() {
                return text;
            }
            text = rest.to_string();
        }
    }
}

fn strip_word_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    let rest = rest.strip_prefix(' ')?;
    Some(rest.trim_start())
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_index, _)) => input[..byte_index].trim_end().to_string(),
        None => input.to_string(),
    }
}
