//! Upstream sentinel codes and what they mean.
//!
//! Government feeds put reserved values where a measurement should be. Each
//! adapter owns a small table of them; anything not in its table is parsed
//! as an ordinary number.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meaning {
    /// Instrument fault. Becomes null.
    Fault,
    /// No reading was taken. Becomes null.
    Missing,
    /// Reported as "no precipitation". Becomes 0.
    NoPrecipitation,
    /// Trace amount, below measurable. Becomes 0.
    Trace,
    /// Valid reading with a special meaning (e.g. variable wind). Kept as-is.
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Raw {
    Number(f64),
    Code(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentinelRule {
    pub raw: Raw,
    pub meaning: Meaning,
}

const fn num(value: f64, meaning: Meaning) -> SentinelRule {
    SentinelRule {
        raw: Raw::Number(value),
        meaning,
    }
}

const fn code(value: &'static str, meaning: Meaning) -> SentinelRule {
    SentinelRule {
        raw: Raw::Code(value),
        meaning,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SentinelTable {
    rules: &'static [SentinelRule],
}

/// CWA station observations (temperature, humidity, pressure, rain, wind speed, UV).
pub const CWA_OBSERVATION: SentinelTable = SentinelTable {
    rules: &[
        num(-99.0, Meaning::Fault),
        num(-98.0, Meaning::NoPrecipitation),
        code("X", Meaning::Missing),
        code("T", Meaning::Trace),
    ],
};

/// CWA wind direction: the observation table plus 990 for variable wind.
pub const CWA_WIND_DIRECTION: SentinelTable = SentinelTable {
    rules: &[
        num(-99.0, Meaning::Fault),
        num(-98.0, Meaning::NoPrecipitation),
        num(990.0, Meaning::Indeterminate),
        code("X", Meaning::Missing),
        code("T", Meaning::Trace),
    ],
};

/// MOENV air-quality readings.
pub const MOENV_READING: SentinelTable = SentinelTable {
    rules: &[
        code("", Meaning::Missing),
        code("-", Meaning::Missing),
        code("ND", Meaning::Missing),
        code("x", Meaning::Missing),
    ],
};

impl Meaning {
    fn apply(self, raw: Option<f64>) -> Option<f64> {
        match self {
            Meaning::Fault | Meaning::Missing => None,
            Meaning::NoPrecipitation | Meaning::Trace => Some(0.0),
            Meaning::Indeterminate => raw,
        }
    }
}

impl SentinelTable {
    pub fn rules(&self) -> &'static [SentinelRule] {
        self.rules
    }

    /// Translate a JSON value (number or string) into a measurement.
    pub fn translate(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64().and_then(|f| self.translate_number(f)),
            Value::String(s) => self.translate_str(s),
            _ => None,
        }
    }

    pub fn translate_str(&self, raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        for rule in self.rules {
            if let Raw::Code(c) = rule.raw {
                if c == trimmed {
                    return rule.meaning.apply(None);
                }
            }
        }
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(|f| self.translate_number(f))
    }

    pub fn translate_number(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        for rule in self.rules {
            if let Raw::Number(n) = rule.raw {
                if n == value {
                    return rule.meaning.apply(Some(value));
                }
            }
        }
        Some(value)
    }
}
