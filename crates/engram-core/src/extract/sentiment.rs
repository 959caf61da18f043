//! Stage 4: hedge and sentiment classification. Lexical scoring over the
//! cleaned utterance; the fallback posture of the whole stage is
//! moderate hedge, neutral sentiment.

use crate::confidence::HedgeLevel;
use crate::types::case_fold;

const STRONG_HEDGES: &[&str] = &[
    "not sure",
    "no idea",
    "can't remember",
    "cannot remember",
    "might be wrong",
];
const MODERATE_HEDGES: &[&str] = &["i think", "i guess", "possibly", "perhaps", "maybe"];
const MILD_HEDGES: &[&str] = &["probably", "i believe", "pretty sure", "kind of", "sort of"];

const POSITIVE_WORDS: &[&str] = &[
    "love", "loves", "adore", "adores", "great", "amazing", "favorite", "favourite", "enjoy",
    "enjoys", "wonderful", "excited",
];
const NEGATIVE_WORDS: &[&str] = &[
    "hate", "hates", "dislike", "dislikes", "awful", "terrible", "annoying", "worst", "dreads",
    "can't stand",
];
const INTENSIFIERS: &[&str] = &["really", "absolutely", "totally", "especially", "so much"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy)]
pub struct SentimentReading {
    pub hedge: HedgeLevel,
    pub polarity: Polarity,
    /// [-1, 1]; sign follows polarity.
    pub score: f32,
    /// Multiplier for confidence scoring; >= 1.0 for intensified
    /// statements, 1.0 otherwise.
    pub strength_factor: f32,
}

impl Default for SentimentReading {
    fn default() -> Self {
        // Stage fallback: moderate hedge, neutral sentiment.
        Self {
            hedge: HedgeLevel::Moderate,
            polarity: Polarity::Neutral,
            score: 0.0,
            strength_factor: 1.0,
        }
    }
}

pub fn classify(utterance: &str) -> SentimentReading {
    let folded = case_fold(utterance);

    let hedge = if STRONG_HEDGES.iter().any(|h| folded.contains(h)) {
        HedgeLevel::Strong
    } else if MODERATE_HEDGES.iter().any(|h| folded.contains(h)) {
        HedgeLevel::Moderate
    } else if MILD_HEDGES.iter().any(|h| folded.contains(h)) {
        HedgeLevel::Mild
    } else {
        HedgeLevel::None
    };

    let positive = POSITIVE_WORDS.iter().filter(|w| folded.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| folded.contains(*w)).count();
    let intensified = INTENSIFIERS.iter().any(|w| folded.contains(w));

    let (polarity, score) = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => (Polarity::Positive, 0.6 + 0.1 * positive.min(4) as f32),
        std::cmp::Ordering::Less => (Polarity::Negative, -(0.6 + 0.1 * negative.min(4) as f32)),
        std::cmp::Ordering::Equal => (Polarity::Neutral, 0.0),
    };

    SentimentReading {
        hedge,
        polarity,
        score: score.clamp(-1.0, 1.0),
        strength_factor: if intensified && polarity != Polarity::Neutral {
            1.05
        } else {
            1.0
        },
    }
}

/// Sarcasm inverts the reading; an ambiguous inversion lands on neutral.
pub fn invert(reading: SentimentReading) -> SentimentReading {
    let polarity = match reading.polarity {
        Polarity::Positive => Polarity::Negative,
        Polarity::Negative => Polarity::Positive,
        Polarity::Neutral => Polarity::Neutral,
    };
    SentimentReading {
        polarity,
        score: -reading.score,
        ..reading
    }
}
