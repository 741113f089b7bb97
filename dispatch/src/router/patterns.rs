//! Fixed pattern table for cheap classification.
//!
//! Rows are checked in order; the first message type with any matching
//! trigger wins. Event beats complex task beats question so that
//! "remind me what time the meeting is?" is logged as an event.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::MessageType;

static PATTERN_TABLE: LazyLock<Vec<(MessageType, Vec<Regex>)>> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("classifier pattern should compile"))
            .collect()
    };
    vec![
        (
            MessageType::Event,
            compile(&[
                r"(?i)\bremind(?:\s+me|er)\b",
                r"(?i)\b(?:schedule|appointment|meeting|deadline|birthday|anniversary)\b",
                r"(?i)\b(?:tomorrow|tonight|next\s+(?:week|month|monday|tuesday|wednesday|thursday|friday|saturday|sunday))\s+at\b",
                r"(?i)\bdon'?t\s+let\s+me\s+forget\b",
            ]),
        ),
        (
            MessageType::ComplexTask,
            compile(&[
                r"(?i)\b(?:plan|analy[sz]e|research|strategy|roadmap)\b",
                r"(?i)\bcompare\b.+\band\b",
                r"(?i)\bstep[\s-]by[\s-]step\b",
                r"(?i)\bbreak\s+(?:it\s+)?down\b",
                r"(?i)\b(?:write|draft|prepare)\s+(?:a|an|the)\s+(?:report|proposal|itinerary|business\s+plan)\b",
            ]),
        ),
        (
            MessageType::Question,
            compile(&[
                r"\?\s*$",
                r"(?i)^\s*(?:what|why|how|when|where|who|which|whose|is|are|can|could|does|do|did|should|would|will)\b",
                r"(?i)\b(?:explain|tell\s+me\s+about|define)\b",
            ]),
        ),
        (
            MessageType::Chat,
            compile(&[
                r"(?i)^\s*(?:hi|hello|hey|yo|hiya|thanks|thank\s+you|thx|good\s+(?:morning|afternoon|evening|night)|bye|goodbye|see\s+you|ok|okay|cool|nice|lol)\b",
                r"(?i)\bhow\s+are\s+you\b",
            ]),
        ),
        (
            MessageType::Irrelevant,
            compile(&[
                r"^[^\p{L}\p{N}]*$",
                r"(?i)\b(?:viagra|casino\s+bonus|crypto\s+giveaway|click\s+here\s+to\s+claim)\b",
            ]),
        ),
    ]
});

/// First message type whose triggers match `input`.
pub fn match_pattern(input: &str) -> Option<MessageType> {
    PATTERN_TABLE
        .iter()
        .find(|(_, triggers)| triggers.iter().any(|re| re.is_match(input)))
        .map(|(message_type, _)| *message_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows() {
        let cases = [
            ("Remind me to call mom tomorrow at 5", Some(MessageType::Event)),
            ("I have a dentist appointment on Friday", Some(MessageType::Event)),
            (
                "Plan a 3-day trip to Rome and compare hotels",
                Some(MessageType::ComplexTask),
            ),
            ("What is the capital of France?", Some(MessageType::Question)),
            ("explain borrow checking", Some(MessageType::Question)),
            ("hello there", Some(MessageType::Chat)),
            ("Thanks!", Some(MessageType::Chat)),
            ("!!! ... ###", Some(MessageType::Irrelevant)),
            ("The sky looks grey", None),
        ];
        for (input, expected) in cases {
            assert_eq!(match_pattern(input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_event_wins_over_question() {
        assert_eq!(
            match_pattern("Can you remind me about the meeting?"),
            Some(MessageType::Event)
        );
    }

    #[test]
    fn test_complex_wins_over_question() {
        assert_eq!(
            match_pattern("How should I plan my thesis research?"),
            Some(MessageType::ComplexTask)
        );
    }
}
