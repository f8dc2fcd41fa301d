//! Text normalization for consistent comparison.
//!
//! Raw extracted page text is noisy: navigation labels, cookie banners,
//! social links, and volatile dates all churn between fetches without the
//! document meaning anything different. Normalization strips that noise
//! before hashing so the change-detection signals stay quiet on boilerplate
//! churn.
//!
//! Mutable "last updated" style dates are masked with a fixed token;
//! effective dates are protected and kept verbatim, since for a legal
//! document the effective date IS content.

use regex::Regex;

const NAV_WORDS: [&str; 7] = ["home", "menu", "back", "next", "previous", "top", "skip"];

pub struct TextNormalizer {
    boilerplate_patterns: Vec<Regex>,
    mutable_date_patterns: Vec<Regex>,
    effective_date: Regex,
    zero_width: Regex,
    double_quotes: Regex,
    single_quotes: Regex,
    dashes: Regex,
    dot_runs: Regex,
    dash_runs: Regex,
    space_runs: Regex,
    newline_runs: Regex,
    bullet_prefix: Regex,
    punct_only_line: Regex,
    space_before_punct: Regex,
    missing_space_after_punct: Regex,
    blank_lines: Regex,
    whitespace_runs: Regex,
    caps_header: Regex,
    numbered_header: Regex,
}

impl TextNormalizer {
    pub fn new() -> Self {
        let boilerplate_patterns = [
            r"(?i)skip\s+to\s+(?:main\s+)?content",
            r"(?i)table\s+of\s+contents?",
            r"(?i)jump\s+to\s+(?:navigation|section)",
            r"(?i)you\s+are\s+here:?",
            r"(?i)share\s+(?:this\s+)?(?:on|via)\s+(?:facebook|twitter|linkedin|social|media)",
            r"(?i)follow\s+us\s+on\s+(?:facebook|twitter|linkedin|instagram)",
            r"(?i)share\s+this\s+(?:page|article|post)",
            r"(?i)subscribe\s+to\s+(?:our\s+)?newsletter",
            r"(?i)sign\s+up\s+for\s+(?:updates|alerts|newsletter)",
            r"(?i)this\s+(?:website|site)\s+uses\s+cookies",
            r"(?i)by\s+(?:continuing|using|browsing)\s+(?:this\s+)?(?:site|website)",
            r"(?i)accept\s+(?:all\s+)?cookies?",
            r"(?i)manage\s+cookie\s+(?:preferences|settings)",
            r"(?i)print\s+(?:this\s+)?(?:page|document|article)",
            r"(?i)download\s+(?:as\s+)?(?:pdf|word|doc)",
            r"(?i)advertisement",
            r"(?i)sponsored\s+(?:content|by|post)",
            r"(?i)loading\.{3,}",
            r"(?i)please\s+(?:wait|enable\s+javascript)",
            r"(?i)javascript\s+(?:is\s+)?(?:required|disabled)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static boilerplate pattern"))
        .collect();

        let mutable_date_patterns = [
            r"(?i)\b(?:last\s+)?(?:updated|modified|revised)\s*:?\s*(?:on\s+)?(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4}",
            r"(?i)\b(?:last\s+)?(?:updated|modified|revised)\s*:?\s*(?:on\s+)?(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\.?\s+\d{1,2},?\s+\d{4}",
            r"(?i)\b(?:last\s+)?(?:updated|modified|revised)\s*:?\s*(?:on\s+)?\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}",
            r"(?i)\b(?:last\s+)?(?:updated|modified|revised)\s*:?\s*(?:on\s+)?\d{4}[/\-.]\d{1,2}[/\-.]\d{1,2}",
            r"(?i)\bversion\s+\d+(?:\.\d+)*",
            r"(?i)\bv\d+(?:\.\d+)*",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static date pattern"))
        .collect();

        Self {
            boilerplate_patterns,
            mutable_date_patterns,
            effective_date: Regex::new(
                r"(?i)effective\s+(?:date\s*:?\s*)?(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4}",
            )
            .expect("static pattern"),
            zero_width: Regex::new(r"[\u{200b}\u{200c}\u{200d}\u{feff}]").expect("static pattern"),
            double_quotes: Regex::new("[\u{201c}\u{201d}\u{201e}]").expect("static pattern"),
            single_quotes: Regex::new("[\u{2018}\u{2019}]").expect("static pattern"),
            dashes: Regex::new("[\u{2013}\u{2014}]").expect("static pattern"),
            dot_runs: Regex::new(r"\.{4,}").expect("static pattern"),
            dash_runs: Regex::new(r"-{3,}").expect("static pattern"),
            space_runs: Regex::new(r"[ \t]+").expect("static pattern"),
            newline_runs: Regex::new(r"\n\s*\n\s*\n+").expect("static pattern"),
            bullet_prefix: Regex::new(r"(?m)^[-•·▪▫‣⁃]\s*").expect("static pattern"),
            punct_only_line: Regex::new(r"^[^\w\s]*$").expect("static pattern"),
            space_before_punct: Regex::new(r" +([,.;:!?])").expect("static pattern"),
            missing_space_after_punct: Regex::new(r"([,.;:!?])([A-Za-z])").expect("static pattern"),
            blank_lines: Regex::new(r"\n\s*\n").expect("static pattern"),
            whitespace_runs: Regex::new(r"\s+").expect("static pattern"),
            caps_header: Regex::new(r"^[A-Z][A-Z\s\d.\-]{5,50}$").expect("static pattern"),
            numbered_header: Regex::new(r"^\d+\.\s*[A-Z][A-Za-z\s]{5,50}$").expect("static pattern"),
        }
    }

    /// Normalize raw extracted text.
    ///
    /// With `preserve_structure` the line/paragraph layout survives (section
    /// headers are upcased and padded); without it the result is a single
    /// flowed line, which is what the hashing layer prefers for storage-free
    /// comparisons.
    pub fn normalize_text(&self, text: &str, preserve_structure: bool) -> String {
        if text.is_empty() {
            return String::new();
        }

        let text = self.basic_cleanup(text);
        let text = self.remove_boilerplate(&text);
        let text = self.normalize_dates(&text);
        let text = self.standardize_formatting(&text);

        let text = if preserve_structure {
            self.preserve_structure(&text)
        } else {
            self.whitespace_runs.replace_all(&text, " ").into_owned()
        };

        self.final_cleanup(&text)
    }

    fn basic_cleanup(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let text = self.zero_width.replace_all(&text, "");
        let text = self.double_quotes.replace_all(&text, "\"");
        let text = self.single_quotes.replace_all(&text, "'");
        let text = self.dashes.replace_all(&text, "-");
        let text = self.dot_runs.replace_all(&text, "...");
        let text = self.dash_runs.replace_all(&text, "---");
        self.space_runs.replace_all(&text, " ").into_owned()
    }

    fn remove_boilerplate(&self, text: &str) -> String {
        let mut text = text.to_string();
        for pattern in &self.boilerplate_patterns {
            text = pattern.replace_all(&text, "").into_owned();
        }

        text.split('\n')
            .map(str::trim)
            .filter(|line| {
                line.len() >= 3
                    && !self.punct_only_line.is_match(line)
                    && !NAV_WORDS.contains(&line.to_lowercase().as_str())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mask mutable dates and version strings, keeping effective dates.
    fn normalize_dates(&self, text: &str) -> String {
        let mut protected = Vec::new();
        let mut text = self
            .effective_date
            .replace_all(text, |caps: &regex::Captures| {
                protected.push(caps[0].to_string());
                format!("__EFFECTIVE_DATE_{}__", protected.len() - 1)
            })
            .into_owned();

        for pattern in &self.mutable_date_patterns {
            text = pattern.replace_all(&text, "[DATE_NORMALIZED]").into_owned();
        }

        for (i, date) in protected.iter().enumerate() {
            text = text.replace(&format!("__EFFECTIVE_DATE_{}__", i), date);
        }
        text
    }

    fn standardize_formatting(&self, text: &str) -> String {
        let text = self.newline_runs.replace_all(text, "\n\n");
        let text = self.bullet_prefix.replace_all(&text, "• ");
        text.split('\n')
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn preserve_structure(&self, text: &str) -> String {
        let mut lines = Vec::new();
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                lines.push(String::new());
            } else if self.is_header(line) {
                let header = if line.len() < 50 {
                    line.to_uppercase()
                } else {
                    line.to_string()
                };
                lines.push(format!("\n{}\n", header));
            } else {
                lines.push(line.to_string());
            }
        }
        lines.join("\n")
    }

    fn is_header(&self, line: &str) -> bool {
        if line.len() > 100 {
            return false;
        }
        self.caps_header.is_match(line) || self.numbered_header.is_match(line)
    }

    fn final_cleanup(&self, text: &str) -> String {
        let text = self.space_runs.replace_all(text, " ");
        let text = self.space_before_punct.replace_all(&text, "$1");
        let text = self.missing_space_after_punct.replace_all(&text, "$1 $2");
        let text = self.blank_lines.replace_all(text.trim(), "\n\n");
        text.into_owned()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boilerplate_lines_are_dropped() {
        let normalizer = TextNormalizer::new();
        let raw = "Skip to main content\nTerms of Service\nYou agree to the terms below.\nHome\nAccept all cookies\n";
        let out = normalizer.normalize_text(raw, true);
        assert!(out.contains("You agree to the terms below."));
        assert!(!out.to_lowercase().contains("skip to main content"));
        assert!(!out.to_lowercase().contains("cookies"));
        assert!(!out.contains("Home"));
    }

    #[test]
    fn mutable_dates_masked_effective_dates_kept() {
        let normalizer = TextNormalizer::new();
        let raw = "Last updated: March 3, 2024\nEffective January 1, 2024 these terms apply.";
        let out = normalizer.normalize_text(raw, true);
        assert!(out.contains("[DATE_NORMALIZED]"));
        assert!(out.contains("Effective January 1, 2024"));
        assert!(!out.contains("March 3, 2024"));
    }

    #[test]
    fn flattened_output_is_single_line() {
        let normalizer = TextNormalizer::new();
        let raw = "Section one applies.\n\nSection two applies.";
        let out = normalizer.normalize_text(raw, false);
        assert!(!out.contains('\n'));
        assert!(out.contains("Section one applies. Section two applies."));
    }

    #[test]
    fn smart_punctuation_is_asciified() {
        let normalizer = TextNormalizer::new();
        let raw = "\u{201c}Agreement\u{201d} \u{2014} the user\u{2019}s obligations";
        let out = normalizer.normalize_text(raw, true);
        assert!(out.contains("\"Agreement\""));
        assert!(out.contains("user's"));
        assert!(out.contains(" - "));
    }

    #[test]
    fn empty_input_stays_empty() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.normalize_text("", true), "");
    }
}
