//! Picks the road-sign name out of the text spans detected in one photo.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::trace;

use crate::model::{BoundingBox, RecognizedCandidate};

/// Minimum score a winner needs. Tuned by hand on street photos.
pub const ACCEPT_THRESHOLD: f64 = 6.0;

const CONFIDENCE_WEIGHT: f64 = 1.0;
const DIGIT_BONUS: f64 = 0.5;
const CENTER_WEIGHT: f64 = 1.5;
const TINY_BOX_AREA: f64 = 0.001;

static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|（[^）]*）").expect("bracket pattern"));

static BUILDING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:-\d+)?$").expect("building number pattern"));

static ROAD_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[가-힣A-Za-z0-9]*[가-힣A-Za-z0-9](?:대로|로|길)(?:\d+번?길|\d+가)?$")
        .expect("road shape pattern")
});

static CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d[\d,]*(?:만원|천원|원|₩|달러|USD|KRW)|[₩$]\d").expect("currency pattern")
});

const ROAD_KEYWORDS: &[&str] = &["고속도로", "국도", "번길", "대로", "거리"];

// Ordered by specificity; only the strongest match counts.
const KEYWORD_WEIGHTS: &[(&str, f64)] = &[
    ("고속도로", 12.0),
    ("번길", 10.0),
    ("대로", 8.0),
    ("국도", 7.0),
    ("거리", 5.5),
    ("길", 5.0),
    ("로", 4.0),
];

const BLACKLIST: &[&str] = &[
    "세일", "할인", "SALE", "영업중", "오픈", "OPEN", "주차", "PARKING", "금연", "흡연",
    "NOSMOKING", "주의", "위험", "CAUTION", "안내", "INFO", "예약", "광고", "무료", "FREE",
    "유료", "영업시간", "HOURS", "전화", "문의", "TEL", "CALL",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedRoad {
    pub name: String,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct RoadNameClassifier {
    accept_threshold: f64,
}

impl Default for RoadNameClassifier {
    fn default() -> Self {
        Self {
            accept_threshold: ACCEPT_THRESHOLD,
        }
    }
}

impl RoadNameClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(accept_threshold: f64) -> Self {
        Self { accept_threshold }
    }

    pub fn accept_threshold(&self) -> f64 {
        self.accept_threshold
    }

    pub fn classify(&self, candidates: &[RecognizedCandidate]) -> Option<String> {
        self.classify_scored(candidates).map(|winner| winner.name)
    }

    pub fn classify_scored(&self, candidates: &[RecognizedCandidate]) -> Option<ClassifiedRoad> {
        let mut best: Option<(&RecognizedCandidate, f64)> = None;
        for candidate in candidates {
            let score = score_candidate(candidate);
            trace!(text = %candidate.raw_text, score, "scored road name candidate");
            if score == f64::NEG_INFINITY {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((candidate, score)),
            }
        }

        let (winner, score) = best?;
        if score < self.accept_threshold {
            return None;
        }
        Some(ClassifiedRoad {
            name: normalize(&winner.cleaned_text),
            score,
            confidence: winner.confidence,
        })
    }
}

/// Collapses whitespace, drops bracketed annotations and free-standing building numbers.
pub fn clean_candidate_text(raw: &str) -> String {
    let without_brackets = BRACKETED.replace_all(raw, " ");
    without_brackets
        .split_whitespace()
        .filter(|token| !BUILDING_NUMBER.is_match(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn is_road_shaped(normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    ROAD_SHAPE.is_match(normalized) || ROAD_KEYWORDS.iter().any(|kw| normalized.contains(kw))
}

pub fn is_blacklisted(normalized: &str) -> bool {
    if CURRENCY.is_match(normalized) {
        return true;
    }
    let upper = normalized.to_uppercase();
    BLACKLIST.iter().any(|kw| contains_keyword(&upper, kw))
}

// Latin keywords must not touch other Latin letters, so `TEL` does not hit `HOTEL`.
fn contains_keyword(upper: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return upper.contains(keyword);
    }
    upper.match_indices(keyword).any(|(start, _)| {
        let before = upper[..start].chars().next_back();
        let after = upper[start + keyword.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphabetic())
            && !after.is_some_and(|c| c.is_ascii_alphabetic())
    })
}

/// Additive score, `NEG_INFINITY` when the candidate can never be picked.
pub fn score_candidate(candidate: &RecognizedCandidate) -> f64 {
    let normalized = normalize(&candidate.cleaned_text);
    if !is_road_shaped(&normalized) || is_blacklisted(&normalized) {
        return f64::NEG_INFINITY;
    }

    let mut score = keyword_score(&normalized);
    score += length_score(candidate.cleaned_text.chars().count());
    score += script_score(&candidate.raw_text);
    if candidate.has_digit {
        score += DIGIT_BONUS;
    }
    if let Some(bbox) = &candidate.bounding_box {
        score += box_score(bbox);
    }
    score + candidate.confidence * CONFIDENCE_WEIGHT
}

fn keyword_score(normalized: &str) -> f64 {
    KEYWORD_WEIGHTS
        .iter()
        .filter(|(kw, _)| normalized.contains(kw))
        .map(|(_, weight)| *weight)
        .fold(0.0, f64::max)
}

fn length_score(len: usize) -> f64 {
    match len {
        0..=3 => -3.0,
        4..=18 => 3.0,
        19..=30 => -1.0,
        _ => -4.0,
    }
}

fn script_score(raw: &str) -> f64 {
    let chars: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let total = chars.len() as f64;
    let hangul = chars.iter().filter(|c| is_hangul(**c)).count() as f64 / total;
    let digits = chars.iter().filter(|c| c.is_ascii_digit()).count() as f64 / total;
    let special = chars.iter().filter(|c| !c.is_alphanumeric()).count() as f64 / total;

    let mut score = if hangul >= 0.8 {
        3.0
    } else if hangul >= 0.5 {
        1.5
    } else if hangul < 0.3 {
        -2.0
    } else {
        0.0
    };

    if digits > 0.5 {
        score -= 3.0;
    } else if digits > 0.3 {
        score -= 1.0;
    }

    if special > 0.3 {
        score -= 3.0;
    } else if special > 0.1 {
        score -= 1.0;
    }
    score
}

fn box_score(bbox: &BoundingBox) -> f64 {
    let mut score = 0.0;
    let aspect = bbox.aspect_ratio();
    if aspect >= 2.0 {
        score += 1.0;
    }
    if aspect >= 3.0 {
        score += 1.0;
    }
    if bbox.area() < TINY_BOX_AREA {
        score -= 1.5;
    }
    score + CENTER_WEIGHT * (1.0 - bbox.center_distance()).max(0.0)
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{3131}'..='\u{318E}' | '\u{1100}'..='\u{11FF}')
}
