//! Voice catalog as reported by `edge-tts --list-voices`.
//!
//! Two output layouts exist in the wild: the older `Name: ...` / `Gender: ...`
//! records separated by blank lines, and the newer fixed-width table with a
//! dashed rule under the header. Both are accepted.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Voice {
    pub short_name: String,
    pub gender: String,
    pub locale: String,
}

impl Voice {
    fn named(short_name: &str) -> Self {
        Self {
            short_name: short_name.to_string(),
            gender: String::new(),
            locale: locale_of(short_name),
        }
    }
}

/// `en-US-AriaNeural` -> `en-US`
fn locale_of(short_name: &str) -> String {
    short_name.splitn(3, '-').take(2).collect::<Vec<_>>().join("-")
}

pub fn parse_voice_listing(output: &str) -> Vec<Voice> {
    let mut voices = Vec::new();
    let mut record: Option<Voice> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(name) = line.strip_prefix("Name:") {
            if let Some(done) = record.take() {
                voices.push(done);
            }
            record = Some(Voice::named(name.trim()));
            continue;
        }
        if let Some(gender) = line.strip_prefix("Gender:") {
            if let Some(current) = record.as_mut() {
                current.gender = gender.trim().to_string();
            }
            continue;
        }
        if record.is_some() || line.is_empty() || line.contains(':') {
            // blank separators and other key/value lines of the record layout
            continue;
        }

        // table layout
        if line.starts_with('-') || line.starts_with("Name ") {
            continue;
        }
        let mut cols = line.split_whitespace();
        if let Some(name) = cols.next() {
            let mut voice = Voice::named(name);
            voice.gender = cols.next().unwrap_or_default().to_string();
            voices.push(voice);
        }
    }

    if let Some(done) = record.take() {
        voices.push(done);
    }
    voices
}

/// Case-insensitive locale filter; `None` keeps everything.
pub fn filter_by_locale(voices: Vec<Voice>, locale: Option<&str>) -> Vec<Voice> {
    match locale {
        Some(locale) => voices
            .into_iter()
            .filter(|v| v.locale.eq_ignore_ascii_case(locale))
            .collect(),
        None => voices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_layout() {
        let out = "Name: en-US-AriaNeural\nGender: Female\n\nName: en-GB-RyanNeural\nGender: Male\n";
        let voices = parse_voice_listing(out);
        assert_eq!(
            voices,
            vec![
                Voice {
                    short_name: "en-US-AriaNeural".into(),
                    gender: "Female".into(),
                    locale: "en-US".into(),
                },
                Voice {
                    short_name: "en-GB-RyanNeural".into(),
                    gender: "Male".into(),
                    locale: "en-GB".into(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_table_layout() {
        let out = "\
Name                               Gender    ContentCategories      VoicePersonalities
---------------------------------  --------  ---------------------  ------------------
af-ZA-AdriNeural                   Female    General                Friendly, Positive
zh-CN-liaoning-XiaobeiNeural       Female    Dialect                Humorous, Lively
";
        let voices = parse_voice_listing(out);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].short_name, "af-ZA-AdriNeural");
        assert_eq!(voices[0].gender, "Female");
        assert_eq!(voices[1].locale, "zh-CN");
    }

    #[test]
    fn test_filter_by_locale_ignores_case() {
        let voices = parse_voice_listing("Name: en-US-AriaNeural\nName: de-DE-KatjaNeural\n");
        let filtered = filter_by_locale(voices.clone(), Some("EN-us"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].short_name, "en-US-AriaNeural");
        assert_eq!(filter_by_locale(voices, None).len(), 2);
    }
}
