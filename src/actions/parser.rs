//! Directive parser: model free text → [`Action`].
//!
//! The primary path runs every directive through the restricted literal
//! grammar. Model output is messy, so each call shape also carries a
//! recovery chain; only when every fallback is exhausted does parsing fail,
//! and the error always carries the raw text.

use std::collections::BTreeMap;

use regex::Regex;

use crate::actions::grammar;
use crate::actions::types::{Action, ParamValue};
use crate::errors::{PilotError, PilotResult};

const DEFAULT_FINISH_MESSAGE: &str = "Task completed";

pub fn parse(text: &str) -> PilotResult<Action> {
    let response = text.trim();

    if response.starts_with(r#"do(action="Type""#) || response.starts_with(r#"do(action="Type_Name""#)
    {
        match literal_do(response) {
            Ok(action) => Ok(action),
            Err(reason) => {
                tracing::warn!(reason = %reason, "literal parse failed for Type, using text fallback");
                type_text_fallback(response).ok_or_else(|| parse_error(text))
            }
        }
    } else if response.starts_with("do") {
        match literal_do(response) {
            Ok(action) => Ok(action),
            Err(reason) => {
                tracing::warn!(reason = %reason, "literal parse failed for do(), using regex fallback");
                generic_do_fallback(response).ok_or_else(|| parse_error(text))
            }
        }
    } else if response.starts_with("finish") {
        Ok(parse_finish(response))
    } else {
        tracing::warn!(
            head = %response.chars().take(100).collect::<String>(),
            "unknown directive shape, expected do(...) or finish(...)"
        );
        Err(parse_error(text))
    }
}

fn parse_error(text: &str) -> PilotError {
    PilotError::Parse {
        raw: text.to_string(),
    }
}

/// Control characters break the single-line call grammar; escape them the
/// same way the string literals spell them so round-tripping is lossless.
fn escape_control(text: &str) -> String {
    text.replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

fn literal_do(response: &str) -> Result<Action, String> {
    let call = grammar::parse_call(&escape_control(response))?;
    let mut name = None;
    let mut params = BTreeMap::new();
    for (key, value) in call.kwargs {
        if key == "action" {
            match value {
                ParamValue::Str(s) => name = Some(s),
                other => return Err(format!("action must be a string, got {other:?}")),
            }
        } else {
            params.insert(key, value);
        }
    }
    let name = name.ok_or("missing action keyword")?;
    Ok(Action::Do { name, params })
}

/// Recovers the text payload of a Type directive that broke the grammar
/// (typically unescaped inner quotes). The payload is taken verbatim from
/// after `text="` up to two characters before the end — the directive is
/// assumed to close with `")`, which is wrong for payloads whose literal
/// tail is not `")`. Known fragility, kept from the wire protocol.
fn type_text_fallback(response: &str) -> Option<Action> {
    let marker = ["text=\"", "text='"]
        .iter()
        .find_map(|m| response.find(m).map(|i| i + m.len()))?;
    let end = response
        .char_indices()
        .rev()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let text = if end > marker {
        response[marker..end].to_string()
    } else {
        String::new()
    };
    let mut params = BTreeMap::new();
    params.insert("text".to_string(), ParamValue::Str(text));
    Some(Action::Do {
        name: "Type".to_string(),
        params,
    })
}

/// Opportunistic extraction for malformed `do(...)` directives: pull out
/// whatever recognized keys can be found and assemble a partial action.
/// Without at least an action name there is nothing to dispatch.
fn generic_do_fallback(response: &str) -> Option<Action> {
    let action_re = Regex::new(r#"action\s*=\s*["']([^"']+)["']"#).unwrap();
    let name = action_re.captures(response)?.get(1)?.as_str().to_string();

    let mut params = BTreeMap::new();

    let message_re = Regex::new(r#"(?s)message\s*=\s*["'](.+)$"#).unwrap();
    if let Some(caps) = message_re.captures(response) {
        let mut message = caps.get(1).map_or("", |m| m.as_str());
        if message.ends_with("\")") || message.ends_with("')") {
            message = &message[..message.len() - 2];
        } else if message.ends_with('"') || message.ends_with('\'') {
            message = &message[..message.len() - 1];
        }
        params.insert("message".to_string(), ParamValue::Str(message.to_string()));
    }

    let element_re = Regex::new(r"element\s*=\s*\[([^\]]+)\]").unwrap();
    if let Some(caps) = element_re.captures(response) {
        let mut coords = Vec::new();
        for part in caps.get(1).map_or("", |m| m.as_str()).split(',') {
            coords.push(part.trim().parse::<i64>().ok()?);
        }
        params.insert("element".to_string(), ParamValue::IntList(coords));
    }

    let app_re = Regex::new(r#"app\s*=\s*["']([^"']+)["']"#).unwrap();
    if let Some(caps) = app_re.captures(response) {
        let app = caps.get(1).map_or("", |m| m.as_str()).to_string();
        params.insert("app".to_string(), ParamValue::Str(app));
    }

    let duration_re = Regex::new(r#"duration\s*=\s*["']([^"']+)["']"#).unwrap();
    if let Some(caps) = duration_re.captures(response) {
        let duration = caps.get(1).map_or("", |m| m.as_str()).to_string();
        params.insert("duration".to_string(), ParamValue::Str(duration));
    }

    Some(Action::Do { name, params })
}

/// `finish(...)` never fails: every malformed variant degrades to string
/// extraction, and an empty call gets the default completion message.
fn parse_finish(response: &str) -> Action {
    match grammar::parse_call(&escape_control(response)) {
        Ok(call) => {
            let message = call
                .kwarg("message")
                .and_then(ParamValue::as_str)
                .map(str::to_string)
                .or_else(|| {
                    call.positional
                        .first()
                        .and_then(ParamValue::as_str)
                        .map(str::to_string)
                })
                .or_else(|| extract_finish_message(response))
                .unwrap_or_else(|| DEFAULT_FINISH_MESSAGE.to_string());
            Action::Finish { message }
        }
        Err(reason) => {
            tracing::warn!(reason = %reason, "literal parse failed for finish, using fallback");
            let message = extract_finish_message(response).unwrap_or_else(|| {
                response
                    .replacen("finish(", "", 1)
                    .trim_end_matches(')')
                    .to_string()
            });
            Action::Finish { message }
        }
    }
}

/// Everything between `message="` and the last matching quote in the text.
/// A marker with no closing quote after it yields an empty message — the
/// marker commits the branch.
fn extract_finish_message(response: &str) -> Option<String> {
    for (marker, quote) in [("message=\"", '"'), ("message='", '\'')] {
        if let Some(start) = response.find(marker) {
            let start = start + marker.len();
            let message = match response.rfind(quote) {
                Some(end) if end > start => response[start..end].to_string(),
                _ => String::new(),
            };
            return Some(message);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn do_action(text: &str) -> (String, BTreeMap<String, ParamValue>) {
        match parse(text).unwrap() {
            Action::Do { name, params } => (name, params),
            other => panic!("expected Do, got {other:?}"),
        }
    }

    #[test]
    fn literal_tap_keeps_exact_values() {
        let (name, params) = do_action(r#"do(action="Tap", element=[540, 1200])"#);
        assert_eq!(name, "Tap");
        assert_eq!(
            params.get("element"),
            Some(&ParamValue::IntList(vec![540, 1200]))
        );
    }

    #[test]
    fn literal_swipe_with_both_points() {
        let (name, params) = do_action(r#"do(action="Swipe", start=[500, 800], end=[500, 200])"#);
        assert_eq!(name, "Swipe");
        assert_eq!(
            params.get("start"),
            Some(&ParamValue::IntList(vec![500, 800]))
        );
        assert_eq!(params.get("end"), Some(&ParamValue::IntList(vec![500, 200])));
    }

    #[test]
    fn multiline_type_text_survives_the_literal_path() {
        let (name, params) = do_action("do(action=\"Type\", text=\"line one\nline two\")");
        assert_eq!(name, "Type");
        assert_eq!(
            params.get("text"),
            Some(&ParamValue::Str("line one\nline two".into()))
        );
    }

    #[test]
    fn broken_inner_quotes_recover_via_text_fallback() {
        let (name, params) = do_action(r#"do(action="Type", text="He said "hi"")"#);
        assert_eq!(name, "Type");
        assert_eq!(
            params.get("text"),
            Some(&ParamValue::Str(r#"He said "hi""#.into()))
        );
    }

    #[test]
    fn text_fallback_preserves_bytes_including_newlines() {
        let input = "do(action=\"Type\", text=\"a \"b\"\nc\")";
        let (_, params) = do_action(input);
        assert_eq!(params.get("text"), Some(&ParamValue::Str("a \"b\"\nc".into())));
    }

    #[test]
    fn type_name_literal_keeps_its_own_name() {
        let (name, _) = do_action(r#"do(action="Type_Name", text="Alice")"#);
        assert_eq!(name, "Type_Name");
    }

    #[test]
    fn generic_fallback_recovers_message_with_inner_quotes() {
        // Inner quotes break the grammar; the greedy message extraction
        // runs to the end of the text and trims the closing `")`.
        let input = r#"do(action="Take_over", message="scan "QR" to log in")"#;
        let (name, params) = do_action(input);
        assert_eq!(name, "Take_over");
        assert_eq!(
            params.get("message"),
            Some(&ParamValue::Str(r#"scan "QR" to log in"#.into()))
        );
    }

    #[test]
    fn generic_fallback_extracts_element_list() {
        // Bare identifier argument breaks the grammar.
        let input = r#"do(action="Tap", element=[300, 400], note=now)"#;
        let (name, params) = do_action(input);
        assert_eq!(name, "Tap");
        assert_eq!(
            params.get("element"),
            Some(&ParamValue::IntList(vec![300, 400]))
        );
        assert_eq!(params.get("message"), None);
    }

    #[test]
    fn generic_fallback_extracts_app_and_duration() {
        let input = r#"do(action="Launch", app="Settings", duration="2 seconds", when=now)"#;
        let (name, params) = do_action(input);
        assert_eq!(name, "Launch");
        assert_eq!(params.get("app"), Some(&ParamValue::Str("Settings".into())));
        assert_eq!(
            params.get("duration"),
            Some(&ParamValue::Str("2 seconds".into()))
        );
    }

    #[test]
    fn finish_with_keyword_message() {
        assert_eq!(
            parse(r#"finish(message="Done")"#).unwrap(),
            Action::Finish {
                message: "Done".into()
            }
        );
    }

    #[test]
    fn finish_with_positional_message() {
        assert_eq!(
            parse(r#"finish("wrapped up")"#).unwrap(),
            Action::Finish {
                message: "wrapped up".into()
            }
        );
    }

    #[test]
    fn empty_finish_defaults_its_message() {
        assert_eq!(
            parse("finish()").unwrap(),
            Action::Finish {
                message: "Task completed".into()
            }
        );
    }

    #[test]
    fn malformed_finish_recovers_message_between_quotes() {
        assert_eq!(
            parse(r#"finish(message="half done" and more"#).unwrap(),
            Action::Finish {
                message: "half done".into()
            }
        );
    }

    #[test]
    fn finish_marker_without_closing_quote_commits_to_empty() {
        assert_eq!(
            parse(r#"finish(message="half done"#).unwrap(),
            Action::Finish {
                message: String::new()
            }
        );
    }

    #[test]
    fn unrecognized_text_fails_with_raw_preserved() {
        let raw = "I think we should tap the blue button";
        match parse(raw) {
            Err(PilotError::Parse { raw: kept }) => assert_eq!(kept, raw),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn do_without_action_name_fails() {
        let raw = r#"do(element=[1, 2])"#;
        assert!(matches!(parse(raw), Err(PilotError::Parse { .. })));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let (name, _) = do_action("  \n do(action=\"Back\") \n ");
        assert_eq!(name, "Back");
    }
}
