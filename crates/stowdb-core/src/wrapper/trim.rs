use crate::value::Value;
use serde::{Deserialize, Serialize};

///
/// TrimSide
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TrimSide {
    Start,
    End,
    #[default]
    Both,
}

///
/// Trim
/// Whitespace trimming applied on read.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Trim {
    pub side: TrimSide,
}

impl Trim {
    pub(super) fn read(&self, raw: Value) -> Value {
        let text = match raw {
            Value::Text(text) => text,
            other => return other,
        };

        let trimmed = match self.side {
            TrimSide::Start => text.trim_start(),
            TrimSide::End => text.trim_end(),
            TrimSide::Both => text.trim(),
        };

        if trimmed.len() == text.len() {
            Value::Text(text)
        } else {
            Value::Text(trimmed.to_string())
        }
    }
}
