use oxwatch_common::types::SignalValue;

/// Equality, set membership and masked matching on discrete values.
#[derive(Debug, Clone)]
pub enum StateDetector {
    Binary(bool),
    Multistate { state: i32, inverted: bool },
    Set { states: Vec<i32>, inverted: bool },
    Bitmask { mask: i64, inverted: bool },
    Alphanumeric(String),
}

impl StateDetector {
    /// Values of the wrong shape never match, inverted or not.
    pub fn matches(&self, value: &SignalValue) -> bool {
        match self {
            Self::Binary(state) => value.as_bool() == Some(*state),
            Self::Multistate { state, inverted } => value
                .as_i64()
                .is_some_and(|v| (v == i64::from(*state)) != *inverted),
            Self::Set { states, inverted } => value
                .as_i64()
                .is_some_and(|v| states.iter().any(|s| i64::from(*s) == v) != *inverted),
            Self::Bitmask { mask, inverted } => value
                .as_i64()
                .is_some_and(|v| (v & mask != 0) != *inverted),
            Self::Alphanumeric(state) => value.as_str() == Some(state.as_str()),
        }
    }
}
