//! Lenient JSON recovery for LLM output. Strips markdown fences,
//! extracts the first object or array, repairs trailing commas, and
//! balances open brackets. Gives up to None rather than guessing.

use serde_json::Value;

/// Attempt to recover a JSON value from raw model output.
pub fn repair_json(raw: &str) -> Option<Value> {
    let stripped = strip_fences(raw);
    let candidate = extract_json_span(&stripped)?;
    let candidate = remove_trailing_commas(&candidate);
    let candidate = balance_brackets(&candidate);
    serde_json::from_str(&candidate).ok()
}

/// Remove markdown code fences, keeping their contents.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    let mut out = String::new();
    for (i, part) in trimmed.split("```").enumerate() {
        // Odd segments are fence bodies; drop a leading language tag.
        if i % 2 == 1 {
            let body = part
                .strip_prefix("json")
                .or_else(|| part.strip_prefix("JSON"))
                .unwrap_or(part);
            out.push_str(body);
        } else {
            out.push_str(part);
        }
    }
    out.trim().to_string()
}

/// Take the first `{` or `[` through its matching close (or the end of
/// input when unterminated, leaving balancing to the next pass).
fn extract_json_span(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let bytes: Vec<char> = text[start..].chars().collect();

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *c == '\\' {
                escaped = true;
            } else if *c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[..=i].iter().collect());
                }
            }
            _ => {}
        }
    }

    // Unterminated; return what we have.
    Some(bytes.iter().collect())
}

/// Drop commas that directly precede a closing bracket.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *c == '\\' {
                escaped = true;
            } else if *c == '"' {
                in_string = false;
            }
            out.push(*c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(*c);
            }
            ',' => {
                let next_meaningful = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next_meaningful, Some('}') | Some(']')) {
                    continue;
                }
                out.push(*c);
            }
            _ => out.push(*c),
        }
    }
    out
}

/// Append the closers an unterminated value still needs. An unterminated
/// string is closed first.
fn balance_brackets(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let value = repair_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n[{\"name\": \"Lena\"}]\n```";
        let value = repair_json(raw).unwrap();
        assert_eq!(value[0]["name"], "Lena");
    }

    #[test]
    fn extracts_json_from_prose() {
        let raw = "Here are the entities I found: {\"name\": \"Lena\"} hope that helps!";
        let value = repair_json(raw).unwrap();
        assert_eq!(value["name"], "Lena");
    }

    #[test]
    fn repairs_trailing_commas() {
        let raw = r#"{"items": [1, 2, 3,], "done": true,}"#;
        let value = repair_json(raw).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn balances_truncated_output() {
        let raw = r#"{"entities": [{"name": "Lena", "kind": "person""#;
        let value = repair_json(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "Lena");
    }

    #[test]
    fn commas_inside_strings_survive() {
        let raw = r#"{"text": "a, b, c,"}"#;
        let value = repair_json(raw).unwrap();
        assert_eq!(value["text"], "a, b, c,");
    }

    #[test]
    fn gives_up_on_garbage() {
        assert!(repair_json("no json here at all").is_none());
        assert!(repair_json("").is_none());
    }
}
