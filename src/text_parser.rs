//! Keyword extraction from character names and biographies.

/// Biography keyword -> region label used in queries. First match wins.
const COUNTRY_KEYWORDS: &[(&str, &str)] = &[
    ("france", "France"),
    ("french", "France"),
    ("england", "England"),
    ("english", "England"),
    ("spain", "Spain"),
    ("spanish", "Spain"),
    ("russia", "Russia"),
    ("russian", "Russia"),
    ("germany", "Germany"),
    ("german", "Germany"),
    ("italy", "Italy"),
    ("italian", "Italy"),
    ("austria", "Austria"),
    ("prussia", "Prussia"),
    ("scotland", "Scotland"),
    ("holy roman", "Holy Roman Emperor"),
    ("byzantine", "Byzantine"),
    ("ottoman", "Ottoman"),
];

const ROLE_KEYWORDS: &[(&str, &str)] = &[
    ("king", "King"),
    ("queen", "Queen"),
    ("emperor", "Emperor"),
    ("empress", "Empress"),
    ("tsar", "Tsar"),
    ("czar", "Tsar"),
];

const DYNASTIES: &[&str] = &[
    "Stuart",
    "Tudor",
    "Valois",
    "Habsburg",
    "Bourbon",
    "Plantagenet",
    "Capetian",
    "Romanov",
    "Hohenstaufen",
];

const VOYAGE_KEYWORDS: &[&str] = &[
    "explorer",
    "navigator",
    "voyage",
    "voyages",
    "expedition",
    "circumnavigated",
    "circumnavigation",
];

/// Titles that are not personal names when they appear alone in the alternate-name field.
const BARE_TITLES: &[&str] = &["king", "queen", "emperor", "empress"];

/// Context recovered from free text, consumed by the query strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BiographyContext {
    /// Sorted, unique 4-digit years.
    pub years: Vec<String>,
    pub country: Option<&'static str>,
    pub role: Option<&'static str>,
    pub dynasty: Option<&'static str>,
    pub mentions_voyages: bool,
}

impl BiographyContext {
    pub fn earliest_year(&self) -> Option<&str> {
        self.years.first().map(String::as_str)
    }
}

/// Lowercases and reduces punctuation to single spaces.
pub fn normalize_text(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
        } else {
            normalized.push(' ');
        }
    }
    collapse_whitespace(&normalized)
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Phrase match on word boundaries of already-normalized text.
fn normalized_text_contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded_haystack = format!(" {haystack} ");
    let padded_phrase = format!(" {phrase} ");
    padded_haystack.contains(&padded_phrase)
}

/// Extracts year-like 4-digit tokens in the range 1000..=2029.
pub fn extract_years(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|token| token.len() == 4)
        .filter(|token| {
            token
                .parse::<u32>()
                .is_ok_and(|year| (1000..=2029).contains(&year))
        })
        .map(str::to_string)
        .collect()
}

pub fn extract_country(biography: &str) -> Option<&'static str> {
    let normalized = normalize_text(biography);
    COUNTRY_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized_text_contains_phrase(&normalized, keyword))
        .map(|(_, label)| *label)
}

pub fn extract_role(biography: &str) -> Option<&'static str> {
    let normalized = normalize_text(biography);
    ROLE_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized_text_contains_phrase(&normalized, keyword))
        .map(|(_, label)| *label)
}

pub fn extract_dynasty(biography: &str) -> Option<&'static str> {
    let normalized = normalize_text(biography);
    DYNASTIES
        .iter()
        .find(|dynasty| normalized_text_contains_phrase(&normalized, &dynasty.to_lowercase()))
        .copied()
}

pub fn mentions_voyages(biography: &str) -> bool {
    let normalized = normalize_text(biography);
    VOYAGE_KEYWORDS
        .iter()
        .any(|keyword| normalized_text_contains_phrase(&normalized, keyword))
}

/// Collects years from the date fields and biography plus keyword context.
pub fn extract_context(
    biography: &str,
    birth_date: Option<&str>,
    death_date: Option<&str>,
) -> BiographyContext {
    let mut years = Vec::new();
    years.extend(birth_date.map(extract_years).unwrap_or_default());
    years.extend(death_date.map(extract_years).unwrap_or_default());
    years.extend(extract_years(biography));
    years.sort();
    years.dedup();

    BiographyContext {
        years,
        country: extract_country(biography),
        role: extract_role(biography),
        dynasty: extract_dynasty(biography),
        mentions_voyages: mentions_voyages(biography),
    }
}

/// Combines the display name with the alternate-name field into a searchable personal name.
///
/// `("BARBAROSSA", "Frederick I(Hohenstaufen)")` gives `"Frederick I BARBAROSSA"`,
/// `("CATHERINE II", "(the Great)")` gives `"CATHERINE II the Great"`.
pub fn extract_actual_name(name: &str, alternate_name: &str) -> String {
    let name = collapse_whitespace(name);
    let cleaned = alternate_name
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    if cleaned.is_empty() {
        return name;
    }

    if cleaned.to_lowercase().starts_with("the ") {
        return format!("{name} {}", collapse_whitespace(cleaned));
    }

    let head = collapse_whitespace(cleaned.split('(').next().unwrap_or_default());
    if !head.is_empty() && !BARE_TITLES.contains(&head.to_lowercase().as_str()) {
        return format!("{head} {name}");
    }

    name
}
