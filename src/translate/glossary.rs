//! Glossary protection.
//! Domain vocabulary is swapped for inert placeholder tokens before a line is
//! sent to an engine and swapped back afterwards. `protect` returns the
//! substitutions it made; the caller hands them to `restore`, so concurrent
//! protect/restore pairs never share state.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

/// Built-in terms and their placeholders. Job codes and party-content jargon
/// are the words engines most often mangle.
const BUILTIN_TERMS: &[(&str, &str)] = &[
    ("PLD", "XQ01QX"),
    ("WAR", "XQ02QX"),
    ("DRK", "XQ03QX"),
    ("GNB", "XQ04QX"),
    ("WHM", "XQ05QX"),
    ("SCH", "XQ06QX"),
    ("AST", "XQ07QX"),
    ("SGE", "XQ08QX"),
    ("MNK", "XQ09QX"),
    ("DRG", "XQ10QX"),
    ("NIN", "XQ11QX"),
    ("SAM", "XQ12QX"),
    ("RPR", "XQ13QX"),
    ("VPR", "XQ14QX"),
    ("BRD", "XQ15QX"),
    ("MCH", "XQ16QX"),
    ("DNC", "XQ17QX"),
    ("BLM", "XQ18QX"),
    ("SMN", "XQ19QX"),
    ("RDM", "XQ20QX"),
    ("PCT", "XQ21QX"),
    ("DPS", "XQ22QX"),
    ("AoE", "XQ23QX"),
    ("GCD", "XQ24QX"),
    ("oGCD", "XQ25QX"),
    ("DoT", "XQ26QX"),
    ("LB", "XQ27QX"),
    ("Limit Break", "XQ28QX"),
    ("PF", "XQ29QX"),
    ("Party Finder", "XQ30QX"),
    ("DF", "XQ31QX"),
    ("Duty Finder", "XQ32QX"),
    ("FC", "XQ33QX"),
    ("Free Company", "XQ34QX"),
    ("CWLS", "XQ35QX"),
    ("MT", "XQ36QX"),
    ("OT", "XQ37QX"),
    ("glam", "XQ38QX"),
    ("savage", "XQ39QX"),
    ("ultimate", "XQ40QX"),
    ("tomestone", "XQ41QX"),
];

#[derive(Debug, Error)]
pub enum GlossaryError {
    #[error("glossary IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("glossary parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("glossary pattern error for {term:?}: {source}")]
    Pattern {
        term: String,
        #[source]
        source: regex::Error,
    },
}

/// A placeholder substitution that must be restored after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderEntry {
    pub tag: String,      // e.g. "XQ22QX"
    pub original: String, // e.g. "dps", as it appeared in the input
}

/// Output of [`GlossaryProtector::protect`].
#[derive(Debug, Clone, Default)]
pub struct Protected {
    pub text: String,
    pub placeholders: Vec<PlaceholderEntry>,
}

struct GlossaryTerm {
    placeholder: String,
    pattern: Regex,
}

pub struct GlossaryProtector {
    /// User overrides first, then built-ins; longest term first within each group.
    terms: Vec<GlossaryTerm>,
}

/// Load a flat `{"term": "placeholder"}` override table.
pub fn load_overrides(path: &Path) -> Result<HashMap<String, String>, GlossaryError> {
    let content = std::fs::read_to_string(path)?;
    let map: HashMap<String, String> = serde_json::from_str(&content)?;
    info!(path = %path.display(), terms = map.len(), "glossary overrides loaded");
    Ok(map)
}

impl GlossaryProtector {
    /// Protector over the built-in table only.
    pub fn builtin() -> Self {
        Self::new(&HashMap::new()).unwrap_or_else(|e| {
            warn!(error = %e, "built-in glossary failed to compile");
            Self { terms: Vec::new() }
        })
    }

    /// Union of user overrides and built-ins; an override wins when both name
    /// the same term (case-insensitive).
    pub fn new(overrides: &HashMap<String, String>) -> Result<Self, GlossaryError> {
        let mut user: Vec<(&str, &str)> = overrides
            .iter()
            .filter(|(term, placeholder)| !term.trim().is_empty() && !placeholder.is_empty())
            .map(|(t, p)| (t.as_str(), p.as_str()))
            .collect();
        user.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

        let mut builtin: Vec<(&str, &str)> = BUILTIN_TERMS
            .iter()
            .copied()
            .filter(|(term, _)| !user.iter().any(|(u, _)| u.eq_ignore_ascii_case(term)))
            .collect();
        builtin.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let terms = user
            .into_iter()
            .chain(builtin)
            .map(|(term, placeholder)| {
                Ok(GlossaryTerm {
                    placeholder: placeholder.to_string(),
                    pattern: term_pattern(term)?,
                })
            })
            .collect::<Result<Vec<_>, GlossaryError>>()?;

        Ok(Self { terms })
    }

    /// Load overrides from `path`; a missing or unreadable file falls back to
    /// built-ins only.
    pub fn from_override_file(path: &Path) -> Self {
        match load_overrides(path).and_then(|o| Self::new(&o)) {
            Ok(protector) => protector,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "glossary override load failed, using built-ins");
                Self::builtin()
            }
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Replace every whole-word, case-insensitive occurrence of a configured
    /// term with its placeholder.
    pub fn protect(&self, text: &str) -> Protected {
        let mut entries: Vec<PlaceholderEntry> = Vec::new();
        let mut result = text.to_string();

        for term in &self.terms {
            if !term.pattern.is_match(&result) {
                continue;
            }
            // One tag per distinct spelling so casing survives the round trip.
            let mut variants: Vec<(String, String)> = Vec::new();
            result = term
                .pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let matched = &caps[0];
                    if let Some((_, tag)) = variants.iter().find(|(orig, _)| orig == matched) {
                        return tag.clone();
                    }
                    let tag = if variants.is_empty() {
                        term.placeholder.clone()
                    } else {
                        format!("{}{}", term.placeholder, variants.len() + 1)
                    };
                    variants.push((matched.to_string(), tag.clone()));
                    tag
                })
                .into_owned();

            entries.extend(
                variants
                    .into_iter()
                    .map(|(original, tag)| PlaceholderEntry { tag, original }),
            );
        }

        Protected {
            text: result,
            placeholders: entries,
        }
    }

    /// Put original terms back. Engines sometimes change the case of unknown
    /// tokens, so tags are matched case-insensitively.
    pub fn restore(&self, text: &str, placeholders: &[PlaceholderEntry]) -> String {
        let mut ordered: Vec<&PlaceholderEntry> = placeholders.iter().collect();
        // Longer tags first: "XQ22QX2" must not be eaten by "XQ22QX".
        ordered.sort_by(|a, b| b.tag.len().cmp(&a.tag.len()));

        let mut result = text.to_string();
        for entry in ordered {
            match Regex::new(&format!("(?i){}", regex::escape(&entry.tag))) {
                Ok(re) => {
                    result = re
                        .replace_all(&result, regex::NoExpand(&entry.original))
                        .into_owned();
                }
                Err(_) => result = result.replace(&entry.tag, &entry.original),
            }
        }
        result
    }
}

/// `\b` only where the term itself starts/ends with a word character.
fn term_pattern(term: &str) -> Result<Regex, GlossaryError> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if term.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let tail = if term.chars().last().is_some_and(is_word) { r"\b" } else { "" };
    Regex::new(&format!("(?i){lead}{}{tail}", regex::escape(term))).map_err(|source| {
        GlossaryError::Pattern {
            term: term.to_string(),
            source,
        }
    })
}
