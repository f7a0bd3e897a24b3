use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Scalar stored in a column or carried by an entity attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numbers, plus text that reads as a number (`"5"`, `" 1.5"`, `"-3e2"`).
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Integer(_) => true,
            Self::Float(f) => f.is_finite(),
            Self::Text(s) => is_numeric_text(s),
            _ => false,
        }
    }

    /// Same variant and same content. `Integer(5)` is not identical to `Text("5")`.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => false,
        }
    }

    /// Equality used for dirty checking: identical values, or two numeric
    /// values whose string forms are the same. `5 ~ "5"`, but `5 !~ "05"`
    /// and `5 !~ "5.0"`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self.identical(other) {
            return true;
        }
        self.is_numeric() && other.is_numeric() && self.to_string() == other.to_string()
    }

    /// Rebuilds a key value from its string form, as found in entity hashes.
    pub fn from_key_string(key: &str) -> Self {
        match key.parse::<i64>() {
            Ok(i) => Self::Integer(i),
            Err(_) => Self::Text(key.to_string()),
        }
    }
}

fn is_numeric_text(s: &str) -> bool {
    let trimmed = s.trim_start();
    if trimmed.is_empty() {
        return false;
    }
    // Rust accepts "inf"/"nan" spellings that are not numeric strings.
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
    {
        return false;
    }
    trimmed.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false)
}

/// `f` as an integer when it holds one exactly.
fn integral(f: f64) -> Option<i64> {
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() != 0.0 || !(-BOUND..BOUND).contains(&f) {
        return None;
    }
    Some(f as i64)
}

// Exact and consistent with `Hash`: NaN equals NaN, and a float equals an
// integer only when it holds that integer exactly.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                integral(*f) == Some(*i)
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),

            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(i), Self::Float(f)) => (*i as f64).partial_cmp(f),
            (Self::Float(f), Self::Integer(i)) => f.partial_cmp(&(*i as f64)),

            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.partial_cmp(b),

            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => match integral(*f) {
                Some(i) => {
                    1u8.hash(state);
                    i.hash(state);
                }
                None if f.is_nan() => {
                    2u8.hash(state);
                    f64::NAN.to_bits().hash(state);
                }
                None => {
                    2u8.hash(state);
                    f.to_bits().hash(state);
                }
            },
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => {
                if fl.is_nan() {
                    write!(f, "NaN")
                } else if fl.is_infinite() {
                    if *fl > 0.0 { write!(f, "Infinity") } else { write!(f, "-Infinity") }
                } else {
                    write!(f, "{}", fl)
                }
            }
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_and_numeric_text_are_loosely_equal() {
        assert!(Value::Integer(5).loosely_equals(&Value::Text("5".into())));
        assert!(Value::Text("5".into()).loosely_equals(&Value::Integer(5)));
    }

    #[test]
    fn test_leading_zero_is_not_loosely_equal() {
        assert!(!Value::Text("05".into()).loosely_equals(&Value::Integer(5)));
    }

    #[test]
    fn test_decimal_text_is_not_loosely_equal_to_integer() {
        assert!(!Value::Text("5.0".into()).loosely_equals(&Value::Integer(5)));
    }

    #[test]
    fn test_whole_float_matches_integer_string_form() {
        assert!(Value::Float(5.0).loosely_equals(&Value::Integer(5)));
        assert!(!Value::Float(5.5).loosely_equals(&Value::Integer(5)));
    }

    #[test]
    fn test_non_numeric_values_need_identity() {
        assert!(!Value::Text("a".into()).loosely_equals(&Value::Text("b".into())));
        assert!(!Value::Null.loosely_equals(&Value::Text("".into())));
        assert!(!Value::Boolean(true).loosely_equals(&Value::Integer(1)));
        assert!(Value::Null.loosely_equals(&Value::Null));
    }

    #[test]
    fn test_numeric_text_detection() {
        assert!(Value::Text(" 12".into()).is_numeric());
        assert!(Value::Text("-1.5e3".into()).is_numeric());
        assert!(!Value::Text("inf".into()).is_numeric());
        assert!(!Value::Text("12abc".into()).is_numeric());
        assert!(!Value::Text("".into()).is_numeric());
    }

    #[test]
    fn test_key_string_round_trip() {
        assert_eq!(Value::from_key_string("42"), Value::Integer(42));
        assert_eq!(Value::from_key_string("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Text("a".into()) < Value::Text("b".into()));
        assert!(Value::Null < Value::Integer(0));
    }

    #[test]
    fn test_equal_values_hash_alike() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(value: &Value) -> u64 {
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            hasher.finish()
        }

        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(hash_of(&Value::Integer(1)), hash_of(&Value::Float(1.0)));
        assert_eq!(hash_of(&Value::Float(0.0)), hash_of(&Value::Float(-0.0)));
        assert_eq!(Value::Float(f64::NAN), Value::Float(-f64::NAN));
        assert_eq!(hash_of(&Value::Float(f64::NAN)), hash_of(&Value::Float(-f64::NAN)));

        assert_ne!(Value::Integer(1), Value::Float(1.0 + f64::EPSILON));
        assert_ne!(Value::Integer((1 << 53) + 1), Value::Float((1u64 << 53) as f64));
    }
}
