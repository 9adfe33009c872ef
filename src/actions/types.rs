use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Literal value carried by a directive keyword argument.
/// The parser never produces anything outside these three shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    IntList(Vec<i64>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            ParamValue::IntList(v) => Some(v),
            _ => None,
        }
    }
}

/// One parsed directive from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Do {
        name: String,
        #[serde(default)]
        params: BTreeMap<String, ParamValue>,
    },
    Finish {
        message: String,
    },
}

impl Action {
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        match self {
            Action::Do { params, .. } => params.get(key),
            Action::Finish { .. } => None,
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(ParamValue::as_str)
    }

    /// Reads a 2-integer point parameter (`element`, `start`, `end`),
    /// clamped into the normalized [0,1000] range.
    pub fn point_param(&self, key: &str) -> Option<(i64, i64)> {
        let list = self.param(key)?.as_int_list()?;
        if list.len() != 2 {
            return None;
        }
        Some((list[0].clamp(0, 1000), list[1].clamp(0, 1000)))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Do { name, params } => {
                write!(f, "do(action={name:?}")?;
                for (key, value) in params {
                    match value {
                        ParamValue::Str(s) => write!(f, ", {key}={s:?}")?,
                        ParamValue::Int(n) => write!(f, ", {key}={n}")?,
                        ParamValue::IntList(v) => write!(f, ", {key}={v:?}")?,
                    }
                }
                write!(f, ")")
            }
            Action::Finish { message } => write!(f, "finish(message={message:?})"),
        }
    }
}

/// Dispatch key for `Do` directives. Wire spellings are the ones the model
/// emits (`Type_Name`, `Double Tap`, `Take_over`, `Call_API`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionName {
    Launch,
    Tap,
    Type,
    TypeName,
    Swipe,
    Back,
    Home,
    DoubleTap,
    LongPress,
    Wait,
    Takeover,
    Note,
    CallApi,
    Interact,
}

impl ActionName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Launch" => Some(Self::Launch),
            "Tap" => Some(Self::Tap),
            "Type" => Some(Self::Type),
            "Type_Name" => Some(Self::TypeName),
            "Swipe" => Some(Self::Swipe),
            "Back" => Some(Self::Back),
            "Home" => Some(Self::Home),
            "Double Tap" => Some(Self::DoubleTap),
            "Long Press" => Some(Self::LongPress),
            "Wait" => Some(Self::Wait),
            "Take_over" => Some(Self::Takeover),
            "Note" => Some(Self::Note),
            "Call_API" => Some(Self::CallApi),
            "Interact" => Some(Self::Interact),
            _ => None,
        }
    }
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
    pub requires_confirmation: bool,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
            requires_confirmation: false,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
            requires_confirmation: false,
        }
    }

    pub fn finished(message: Option<String>) -> Self {
        Self {
            success: true,
            should_finish: true,
            message,
            requires_confirmation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_name_wire_spellings() {
        assert_eq!(ActionName::parse("Type_Name"), Some(ActionName::TypeName));
        assert_eq!(ActionName::parse("Double Tap"), Some(ActionName::DoubleTap));
        assert_eq!(ActionName::parse("Long Press"), Some(ActionName::LongPress));
        assert_eq!(ActionName::parse("Take_over"), Some(ActionName::Takeover));
        assert_eq!(ActionName::parse("Call_API"), Some(ActionName::CallApi));
        assert_eq!(ActionName::parse("Teleport"), None);
    }

    #[test]
    fn point_param_requires_two_ints_and_clamps() {
        let mut params = BTreeMap::new();
        params.insert("element".into(), ParamValue::IntList(vec![1200, -5]));
        params.insert("start".into(), ParamValue::IntList(vec![1, 2, 3]));
        let action = Action::Do {
            name: "Tap".into(),
            params,
        };
        assert_eq!(action.point_param("element"), Some((1000, 0)));
        assert_eq!(action.point_param("start"), None);
        assert_eq!(action.point_param("end"), None);
    }
}
