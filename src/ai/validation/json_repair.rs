//! JSON Repair Mechanism
//!
//! Deterministic structural repair of model output (the `StructuralAutoFix`
//! strategy).
//!
//! Handles common LLM JSON output issues:
//! - Markdown code fence wrapping (```json ... ```) and BOM
//! - JSON embedded in explanatory text
//! - Single-quoted strings and bare object keys
//! - Trailing commas
//! - Truncated strings and missing closing braces/brackets
//! - Control characters
//!
//! Text that already parses is returned unchanged, and repaired output is
//! canonical JSON, so applying the repairer to its own output is a no-op.

use serde_json::Value;
use tracing::debug;

/// Output of a successful repair
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    /// Parseable JSON text
    pub text: String,
    pub value: Value,
    /// Whether anything had to change
    pub was_repaired: bool,
}

/// JSON repair strategies
#[derive(Debug, Clone)]
pub struct JsonRepairer {
    max_repair_level: usize,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self {
            max_repair_level: 3,
        }
    }

    /// Parse JSON, attempting repair if the strict parse fails
    pub fn repair(&self, raw: &str) -> Option<Repaired> {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Some(Repaired {
                text: raw.to_string(),
                value,
                was_repaired: false,
            });
        }

        let cleaned = self.preprocess(raw);
        if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
            return Some(Self::canonical(value));
        }

        for level in 1..=self.max_repair_level {
            let repaired = self.repair_at_level(&cleaned, level);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                debug!(level, "JSON repaired");
                return Some(Self::canonical(value));
            }
        }

        // Final attempt: extract JSON from mixed content
        if let Some(extracted) = self.extract_json_from_mixed(&cleaned) {
            if let Ok(value) = serde_json::from_str::<Value>(&extracted) {
                debug!("JSON extracted from mixed content");
                return Some(Self::canonical(value));
            }
            let repaired = self.repair_at_level(&extracted, self.max_repair_level);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                debug!("JSON extracted from mixed content and repaired");
                return Some(Self::canonical(value));
            }
        }

        None
    }

    fn canonical(value: Value) -> Repaired {
        Repaired {
            text: value.to_string(),
            value,
            was_repaired: true,
        }
    }

    /// Preprocess raw input
    fn preprocess(&self, raw: &str) -> String {
        let s = raw.trim().trim_start_matches('\u{feff}');
        self.strip_code_fences(s).trim().to_string()
    }

    /// Strip markdown code fences
    fn strip_code_fences(&self, s: &str) -> String {
        let mut result = s.to_string();

        if result.starts_with("```")
            && let Some(first_newline) = result.find('\n')
        {
            result = result[first_newline + 1..].to_string();
        }

        if result.ends_with("```") {
            result = result[..result.len() - 3].trim_end().to_string();
        }

        result
    }

    /// Attempt repair with increasing aggressiveness
    fn repair_at_level(&self, s: &str, level: usize) -> String {
        let mut result = s.to_string();

        match level {
            1 => {
                result = self.fix_trailing_commas(&result);
                result = self.balance_brackets(&result);
            }
            2 => {
                result = self.normalize_quotes(&result);
                result = self.quote_bare_keys(&result);
                result = self.fix_trailing_commas(&result);
                result = self.fix_truncated_strings(&result);
                result = self.balance_brackets(&result);
            }
            _ => {
                result = self.remove_control_chars(&result);
                result = self.normalize_quotes(&result);
                result = self.quote_bare_keys(&result);
                result = self.fix_trailing_commas(&result);
                result = self.fix_truncated_strings(&result);
                result = self.balance_brackets(&result);
                result = self.truncate_to_valid(&result);
            }
        }

        result
    }

    /// Convert single-quoted strings to double-quoted ones
    fn normalize_quotes(&self, s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut in_double = false;
        let mut in_single = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                if in_single && ch == '\'' {
                    result.pop();
                }
                result.push(ch);
                continue;
            }

            match ch {
                '\\' if in_double || in_single => {
                    escape = true;
                    result.push(ch);
                }
                '"' if in_single => result.push_str("\\\""),
                '"' => {
                    in_double = !in_double;
                    result.push(ch);
                }
                '\'' if !in_double => {
                    in_single = !in_single;
                    result.push('"');
                }
                _ => result.push(ch),
            }
        }

        result
    }

    /// Quote identifier keys: `{key: 1}` becomes `{"key": 1}`
    fn quote_bare_keys(&self, s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        let mut result = String::with_capacity(s.len() + 8);
        let mut in_string = false;
        let mut escape = false;
        let mut expect_key = false;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];

            if in_string {
                if escape {
                    escape = false;
                } else if ch == '\\' {
                    escape = true;
                } else if ch == '"' {
                    in_string = false;
                }
                result.push(ch);
                i += 1;
                continue;
            }

            match ch {
                '"' => {
                    in_string = true;
                    expect_key = false;
                    result.push(ch);
                }
                '{' | ',' => {
                    expect_key = true;
                    result.push(ch);
                }
                c if c.is_whitespace() => result.push(c),
                c if expect_key && (c.is_alphabetic() || c == '_' || c == '$') => {
                    let start = i;
                    while i < chars.len()
                        && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '-'))
                    {
                        i += 1;
                    }
                    let mut j = i;
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    let ident: String = chars[start..i].iter().collect();
                    if j < chars.len() && chars[j] == ':' {
                        result.push('"');
                        result.push_str(&ident);
                        result.push('"');
                    } else {
                        result.push_str(&ident);
                    }
                    expect_key = false;
                    continue;
                }
                c => {
                    expect_key = false;
                    result.push(c);
                }
            }
            i += 1;
        }

        result
    }

    /// Fix trailing commas before ] or }
    fn fix_trailing_commas(&self, s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        let mut result = String::with_capacity(s.len());
        let mut in_string = false;
        let mut escape = false;

        for (i, &ch) in chars.iter().enumerate() {
            if in_string {
                if escape {
                    escape = false;
                } else if ch == '\\' {
                    escape = true;
                } else if ch == '"' {
                    in_string = false;
                }
                result.push(ch);
                continue;
            }

            if ch == '"' {
                in_string = true;
            } else if ch == ',' {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some(']') | Some('}') | None) {
                    continue;
                }
            }
            result.push(ch);
        }

        result
    }

    /// Balance brackets by adding missing closers in nesting order
    fn balance_brackets(&self, s: &str) -> String {
        let mut result = s.to_string();
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                continue;
            }

            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => stack.push('}'),
                '[' if !in_string => stack.push(']'),
                '}' | ']' if !in_string => {
                    stack.pop();
                }
                _ => {}
            }
        }

        if in_string {
            result.push('"');
        }
        while let Some(closer) = stack.pop() {
            result.push(closer);
        }

        result
    }

    /// Fix truncated strings by closing them at the line break
    fn fix_truncated_strings(&self, s: &str) -> String {
        let mut result = String::with_capacity(s.len() + 10);
        let mut in_string = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                result.push(ch);
                continue;
            }

            match ch {
                '\\' if in_string => {
                    escape = true;
                    result.push(ch);
                }
                '"' => {
                    in_string = !in_string;
                    result.push(ch);
                }
                '\n' | '\r' if in_string => {
                    result.push('"');
                    in_string = false;
                    result.push(ch);
                }
                _ => result.push(ch),
            }
        }

        if in_string {
            result.push('"');
        }

        result
    }

    /// Remove control characters that break JSON parsing
    fn remove_control_chars(&self, s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
            .collect()
    }

    /// Truncate to last complete top-level JSON structure
    fn truncate_to_valid(&self, s: &str) -> String {
        let mut last_valid = 0;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;

        for (i, ch) in s.char_indices() {
            if escape {
                escape = false;
                continue;
            }

            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' | '[' if !in_string => depth += 1,
                '}' | ']' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        last_valid = i + 1;
                    }
                }
                _ => {}
            }
        }

        if last_valid > 0 && last_valid < s.len() {
            s[..last_valid].to_string()
        } else {
            s.to_string()
        }
    }

    /// Extract JSON from mixed content (e.g., explanations around JSON)
    fn extract_json_from_mixed(&self, s: &str) -> Option<String> {
        let start = s.find(['{', '['])?;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;

        for (i, ch) in s[start..].char_indices() {
            if escape {
                escape = false;
                continue;
            }

            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' | '[' if !in_string => depth += 1,
                '}' | ']' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(s[start..start + i + 1].to_string());
                    }
                }
                _ => {}
            }
        }

        // Unclosed: hand back the tail so the caller can balance it
        Some(s[start..].to_string())
    }
}
