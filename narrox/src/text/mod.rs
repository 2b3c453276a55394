pub mod mandarin;

/// Inputs at or below this many characters are synthesized as a single unit
/// instead of going through sentence segmentation.
pub const SHORT_INPUT_MAX: usize = 30;

/// Synthesis language. Auto-detection lives on the job, not here: by the time
/// text reaches the segmenter a concrete language has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Mandarin,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Mandarin => "zh",
        }
    }

    pub fn from_code(code: &str) -> Option<Language> {
        match code {
            "en" => Some(Language::English),
            code if code.contains("zh") => Some(Language::Mandarin),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Mandarin => "Mandarin (中文)",
        }
    }
}

/// Detect the language of a text prefix. Only the two supported model
/// families are distinguished; everything that is not Mandarin synthesizes
/// with the English models.
pub fn detect_language(text: &str) -> Language {
    let prefix: String = text.chars().take(1000).collect();
    match whatlang::detect(&prefix) {
        Some(info) if info.lang() == whatlang::Lang::Cmn => Language::Mandarin,
        _ => Language::English,
    }
}

/// One synthesizable unit of text. `display` is the verbatim sentence used
/// for subtitles and lyrics; `spoken` is the normalized copy fed to the
/// synthesis model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub display: String,
    pub spoken: String,
}

/// Split text into ordered synthesis segments. Pure function of
/// `(text, language)`: identical input always yields the same sequence.
pub fn segment(text: &str, language: Language) -> Vec<Segment> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= SHORT_INPUT_MAX {
        return vec![make_segment(trimmed, language)];
    }
    let flattened = trimmed.replace('\n', " ");
    let sentences = match language {
        Language::Mandarin => {
            let compact: String = flattened.chars().filter(|c| !c.is_whitespace()).collect();
            mandarin::split_sentences(&compact)
        }
        Language::English => split_sentences_generic(&flattened),
    };
    sentences
        .into_iter()
        .map(|sentence| make_segment(&sentence, language))
        .collect()
}

fn make_segment(display: &str, language: Language) -> Segment {
    let spoken = match language {
        Language::Mandarin => mandarin::normalize(display),
        Language::English => display.trim().to_string(),
    };
    Segment {
        display: display.to_string(),
        spoken,
    }
}

/// Sentence splitter for languages without dedicated rules. Boundaries sit
/// after `.`/`!`/`?`, with exceptions for decimals, numbered lists,
/// abbreviations (period followed by a lowercase word) and closing quotes,
/// which travel with the sentence they terminate.
fn split_sentences_generic(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        current.push(ch);

        if matches!(ch, '.' | '!' | '?') {
            let mut is_end = true;

            if ch == '.' {
                if let Some(&next) = chars.get(i + 1) {
                    // Decimal like 3.14
                    if next.is_ascii_digit() {
                        is_end = false;
                    }
                }
                if is_end {
                    if let (Some(&next), Some(&after)) = (chars.get(i + 1), chars.get(i + 2)) {
                        // Abbreviation: the sentence continues in lowercase
                        if next.is_whitespace() && after.is_lowercase() {
                            is_end = false;
                        }
                    }
                }
                if is_end && i > 0 && chars[i - 1].is_ascii_digit() {
                    // Numbered list item like "1. first 2. second"
                    if let Some(&next) = chars.get(i + 1) {
                        if next.is_whitespace() && i + 2 < chars.len() {
                            is_end = false;
                        }
                    }
                }
            }

            if is_end {
                if let Some(&next) = chars.get(i + 1) {
                    if matches!(next, '"' | '\u{201D}' | '\u{2019}' | '»') {
                        current.push(next);
                        i += 1;
                    }
                }
                while let Some(&next) = chars.get(i + 1) {
                    if next.is_whitespace() {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }

        i += 1;
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_input_is_a_single_segment() {
        let segments = segment("Hello there.", Language::English);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].display, "Hello there.");
    }

    #[test]
    fn generic_split_on_sentence_boundaries() {
        let text = "The first sentence is right here. The second one follows immediately after.";
        let segments = segment(text, Language::English);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].display, "The first sentence is right here.");
        assert_eq!(
            segments[1].display,
            "The second one follows immediately after."
        );
    }

    #[test]
    fn generic_split_keeps_decimals_and_lists_together() {
        let text =
            "The measured value came out to 3.14 exactly. 1. First item 2. Second item stays whole.";
        let segments = segment(text, Language::English);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].display.contains("3.14"));
        assert!(segments[1].display.contains("2. Second item"));
    }

    #[test]
    fn segmentation_preserves_content() {
        let text = "One sentence with some words in it. Another sentence follows here! And a third one asks a question? Finally a plain tail without punctuation";
        let segments = segment(text, Language::English);
        let rebuilt: String = segments.iter().map(|s| s.display.as_str()).collect();
        assert_eq!(strip_whitespace(&rebuilt), strip_whitespace(text));
    }

    #[test]
    fn mandarin_segmentation_preserves_content() {
        let text = "今天的天气真的是非常不错。我们一起出去走一走吧！你觉得这个主意怎么样？好的没问题。";
        let segments = segment(text, Language::Mandarin);
        assert!(segments.len() >= 3);
        let rebuilt: String = segments.iter().map(|s| s.display.as_str()).collect();
        assert_eq!(strip_whitespace(&rebuilt), strip_whitespace(text));
    }

    #[test]
    fn newlines_are_flattened_before_splitting() {
        let text = "The first half of the sentence\ncontinues on the next line. A second sentence closes the paragraph.";
        let segments = segment(text, Language::English);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].display.contains("continues on the next line."));
    }

    #[test]
    fn detect_mandarin_text() {
        assert_eq!(
            detect_language("今天的天气真的非常不错，我们一起出去散步吧。"),
            Language::Mandarin
        );
        assert_eq!(
            detect_language("The weather is lovely today, let us take a walk outside."),
            Language::English
        );
    }

    #[test]
    fn language_codes_round_trip() {
        assert_eq!(Language::from_code("en"), Some(Language::English));
        assert_eq!(Language::from_code("zh"), Some(Language::Mandarin));
        assert_eq!(Language::from_code("zh-cn"), Some(Language::Mandarin));
        assert_eq!(Language::from_code("fr"), None);
    }
}
