//! Mandarin sentence splitting and synthesis-copy normalization.

use chinese_number::{ChineseCase, ChineseCountMethod, ChineseVariant, NumberToChinese};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PERCENT_RE: Regex = Regex::new(r"(\d+(?:\.\d+)?)%").unwrap();
    static ref CURRENCY_RE: Regex = Regex::new(r"[￥$]\d+(?:\.\d+)?").unwrap();
    static ref UNIT_RE: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*(kg|km|cm|mm|ml)").unwrap();
}

/// Split Mandarin text (whitespace already removed) into sentences. A
/// boundary sits after a sentence-final mark (`。！？?`) or an ellipsis run,
/// unless a closing quotation mark follows, in which case the boundary moves
/// to sit after that quotation mark.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        current.push(ch);
        let mut boundary = false;

        if matches!(ch, '。' | '！' | '？' | '?') {
            boundary = true;
        } else if ch == '…' {
            let mut run = 1;
            while chars.get(i + 1) == Some(&'…') {
                i += 1;
                run += 1;
                current.push('…');
            }
            boundary = run >= 2;
        } else if ch == '.' {
            let mut run = 1;
            while chars.get(i + 1) == Some(&'.') {
                i += 1;
                run += 1;
                current.push('.');
            }
            boundary = run >= 6;
        }

        if boundary {
            if let Some(&quote) = chars.get(i + 1) {
                if matches!(quote, '”' | '’') {
                    current.push(quote);
                    i += 1;
                }
            }
            if !current.is_empty() {
                sentences.push(std::mem::take(&mut current));
            }
        }

        i += 1;
    }

    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Produce the synthesis copy of a Mandarin segment: decorative punctuation
/// stripped, separators mapped to commas, circled numbers flattened, and
/// percentages, currency amounts, unit suffixes and digit runs expanded to
/// their spoken forms. The display copy is never touched.
pub fn normalize(text: &str) -> String {
    let mut t = text.replace('、', "，");
    t = t.replace(['“', '”', '‘', '’', '（', '）'], "");
    t = flatten_circled_numbers(&t);
    t = PERCENT_RE.replace_all(&t, "百分之$1").to_string();
    t = CURRENCY_RE
        .replace_all(&t, |caps: &regex::Captures| {
            let matched = &caps[0];
            let mut chars = matched.chars();
            let symbol = chars.next().unwrap();
            let amount = chars.as_str();
            match symbol {
                '￥' => format!("{}元", amount),
                _ => format!("{}美元", amount),
            }
        })
        .to_string();
    t = UNIT_RE
        .replace_all(&t, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], unit_word(&caps[2]))
        })
        .to_string();
    t = t.replace('℃', "摄氏度");
    expand_digit_runs(&t)
}

fn unit_word(unit: &str) -> &'static str {
    match unit {
        "kg" => "千克",
        "km" => "公里",
        "cm" => "厘米",
        "mm" => "毫米",
        "ml" => "毫升",
        _ => "",
    }
}

/// Map circled-number glyphs (①..⑳) to their plain digit form.
fn flatten_circled_numbers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ('①'..='⑳').contains(&ch) {
            let value = ch as u32 - '①' as u32 + 1;
            out.push_str(&value.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Replace every run of ASCII digits with its spoken Chinese cardinal.
/// Runs that overflow an i64 are left as digits rather than misread.
fn expand_digit_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                out.push_str(&spoken_number(&digits));
                digits.clear();
            }
            out.push(ch);
        }
    }
    if !digits.is_empty() {
        out.push_str(&spoken_number(&digits));
    }
    out
}

fn spoken_number(digits: &str) -> String {
    match digits.parse::<i64>() {
        Ok(num) => num
            .to_chinese(
                ChineseVariant::Simple,
                ChineseCase::Lower,
                ChineseCountMethod::Low,
            )
            .unwrap_or_else(|_| digits.to_string()),
        Err(_) => digits.to_string(),
    }
}
