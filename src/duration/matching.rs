//! Title/artist similarity scoring shared by provider implementations.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "(2)", "(rapper)" style disambiguation suffixes on artist names
    static ref DISAMBIGUATION_SUFFIX: Regex = Regex::new(
        r"\s*\(\d+\)\s*$|\s*\([^)]*(?:rapper|singer|artist|band|musician|producer|dj|DJ)\)\s*$"
    )
    .unwrap();

    // "(Remastered)", "(Deluxe Edition)" style suffixes on titles
    static ref EDITION_SUFFIX: Regex = Regex::new(
        r"(?i)\s*\((?:[^)]*\s)?(?:remaster(?:ed)?|digital|deluxe|bonus|anniversary|expanded|special|collector|limited|edition|version|mix|remix|mono|stereo|selected works|works|hits|best of|greatest|complete|original|enhanced)(?:\s[^)]*)?\)\s*$"
    )
    .unwrap();
}

const TITLE_WEIGHT: f64 = 0.6;
const ARTIST_WEIGHT: f64 = 0.4;

pub fn normalize_artist_name(name: &str) -> String {
    DISAMBIGUATION_SUFFIX.replace_all(name, "").trim().to_string()
}

/// Strips up to three stacked edition suffixes, e.g. "Song (Remastered) (Mono)".
pub fn normalize_title(title: &str) -> String {
    let mut normalized = title.trim().to_string();
    for _ in 0..3 {
        let stripped = EDITION_SUFFIX.replace_all(&normalized, "").trim().to_string();
        if stripped == normalized {
            break;
        }
        normalized = stripped;
    }
    normalized
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Case-insensitive similarity in 0.0-1.0 based on edit distance.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

/// How well a provider result matches the query, title weighted over artist.
pub fn match_score(query_title: &str, query_artist: &str, result_title: &str, result_artist: &str) -> f64 {
    let title_score = string_similarity(&normalize_title(query_title), &normalize_title(result_title));
    let artist_score = string_similarity(
        &normalize_artist_name(query_artist),
        &normalize_artist_name(result_artist),
    );
    title_score * TITLE_WEIGHT + artist_score * ARTIST_WEIGHT
}
