use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument a replay runs against. Passed through to the sink untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    pub id: u64,
    pub symbol: String,
    pub currency: String,
}

impl Contract {
    pub fn new(id: u64, symbol: impl Into<String>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            currency: "USD".into(),
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.symbol, self.id)
    }
}
