//! Property types and values.
//!
//! [`Value`] is a tagged union over the JCR value types. Dates are stored as
//! milliseconds since the Unix epoch. [`Value::convert`] implements the
//! casting rules used when a value is written to a property whose definition
//! requires a different type.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::NodeKey;
use crate::name::Name;
use crate::path::Path;

/// Type tag of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    WeakReference,
    Uri,
    Decimal,
    Undefined,
}

impl PropertyType {
    pub fn is_reference(self) -> bool {
        matches!(self, PropertyType::Reference | PropertyType::WeakReference)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyType::String => "String",
            PropertyType::Binary => "Binary",
            PropertyType::Long => "Long",
            PropertyType::Double => "Double",
            PropertyType::Date => "Date",
            PropertyType::Boolean => "Boolean",
            PropertyType::Name => "Name",
            PropertyType::Path => "Path",
            PropertyType::Reference => "Reference",
            PropertyType::WeakReference => "WeakReference",
            PropertyType::Uri => "URI",
            PropertyType::Decimal => "Decimal",
            PropertyType::Undefined => "undefined",
        };
        f.write_str(s)
    }
}

impl FromStr for PropertyType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "string" => PropertyType::String,
            "binary" => PropertyType::Binary,
            "long" => PropertyType::Long,
            "double" => PropertyType::Double,
            "date" => PropertyType::Date,
            "boolean" => PropertyType::Boolean,
            "name" => PropertyType::Name,
            "path" => PropertyType::Path,
            "reference" => PropertyType::Reference,
            "weakreference" => PropertyType::WeakReference,
            "uri" => PropertyType::Uri,
            "decimal" => PropertyType::Decimal,
            "undefined" => PropertyType::Undefined,
            _ => {
                return Err(CoreError::InvalidName {
                    name: s.to_string(),
                    reason: "unknown property type".to_string(),
                })
            }
        })
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    String(String),
    Binary(Vec<u8>),
    Long(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Boolean(bool),
    Name(Name),
    Path(Path),
    Reference(NodeKey),
    WeakReference(NodeKey),
    Uri(String),
    Decimal(String),
}

impl Value {
    /// Current wall-clock time as a date value.
    pub fn now() -> Value {
        Value::Date(now_millis())
    }

    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Binary(_) => PropertyType::Binary,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Date(_) => PropertyType::Date,
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Name(_) => PropertyType::Name,
            Value::Path(_) => PropertyType::Path,
            Value::Reference(_) => PropertyType::Reference,
            Value::WeakReference(_) => PropertyType::WeakReference,
            Value::Uri(_) => PropertyType::Uri,
            Value::Decimal(_) => PropertyType::Decimal,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) | Value::Date(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Uri(s) | Value::Decimal(s) => Some(s),
            Value::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    /// Target of a strong or weak reference.
    pub fn as_key(&self) -> Option<NodeKey> {
        match self {
            Value::Reference(k) | Value::WeakReference(k) => Some(*k),
            _ => None,
        }
    }

    /// Casts this value to `target`, following the JCR conversion table.
    pub fn convert(&self, target: PropertyType) -> Result<Value, CoreError> {
        if target == PropertyType::Undefined || target == self.property_type() {
            return Ok(self.clone());
        }
        let fail = || CoreError::ValueFormat {
            from: self.property_type(),
            to: target,
            value: self.to_string(),
        };
        let text = self.to_string();
        let converted = match target {
            PropertyType::String => Value::String(text),
            PropertyType::Binary => Value::Binary(text.into_bytes()),
            PropertyType::Long => match self {
                Value::Double(d) => Value::Long(d.trunc() as i64),
                Value::Date(ms) => Value::Long(*ms),
                Value::Decimal(s) | Value::String(s) => Value::Long(parse_long(s).ok_or_else(fail)?),
                Value::Binary(bytes) => Value::Long(
                    parse_long(&String::from_utf8_lossy(bytes)).ok_or_else(fail)?,
                ),
                _ => return Err(fail()),
            },
            PropertyType::Double => match self {
                Value::Long(n) | Value::Date(n) => Value::Double(*n as f64),
                Value::Decimal(s) | Value::String(s) => {
                    Value::Double(s.trim().parse().map_err(|_| fail())?)
                }
                _ => return Err(fail()),
            },
            PropertyType::Date => match self {
                Value::Long(n) => Value::Date(*n),
                Value::Double(d) => Value::Date(d.trunc() as i64),
                Value::Decimal(s) | Value::String(s) => Value::Date(parse_long(s).ok_or_else(fail)?),
                _ => return Err(fail()),
            },
            PropertyType::Boolean => match self {
                Value::String(s) => Value::Boolean(s.trim().eq_ignore_ascii_case("true")),
                Value::Binary(bytes) => {
                    Value::Boolean(String::from_utf8_lossy(bytes).trim().eq_ignore_ascii_case("true"))
                }
                _ => return Err(fail()),
            },
            PropertyType::Name => match self {
                Value::String(s) | Value::Uri(s) => Value::Name(Name::parse(s).map_err(|_| fail())?),
                Value::Path(p) if !p.is_absolute() && p.depth() == 1 => {
                    Value::Name(p.name().cloned().ok_or_else(fail)?)
                }
                _ => return Err(fail()),
            },
            PropertyType::Path => match self {
                Value::String(s) | Value::Uri(s) => Value::Path(Path::parse(s).map_err(|_| fail())?),
                Value::Name(n) => Value::Path(Path::parse(n.as_str()).map_err(|_| fail())?),
                _ => return Err(fail()),
            },
            PropertyType::Reference => match self {
                Value::WeakReference(k) => Value::Reference(*k),
                Value::String(s) => Value::Reference(NodeKey::parse(s).map_err(|_| fail())?),
                _ => return Err(fail()),
            },
            PropertyType::WeakReference => match self {
                Value::Reference(k) => Value::WeakReference(*k),
                Value::String(s) => Value::WeakReference(NodeKey::parse(s).map_err(|_| fail())?),
                _ => return Err(fail()),
            },
            PropertyType::Uri => match self {
                Value::String(s) => Value::Uri(s.clone()),
                Value::Name(_) | Value::Path(_) => Value::Uri(text),
                _ => return Err(fail()),
            },
            PropertyType::Decimal => match self {
                Value::Long(_) | Value::Double(_) | Value::Date(_) => Value::Decimal(text),
                Value::String(s) => {
                    s.trim().parse::<f64>().map_err(|_| fail())?;
                    Value::Decimal(s.trim().to_string())
                }
                _ => return Err(fail()),
            },
            PropertyType::Undefined => self.clone(),
        };
        Ok(converted)
    }
}

fn parse_long(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|d| d.trunc() as i64))
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Uri(s) | Value::Decimal(s) => f.write_str(s),
            Value::Binary(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Value::Long(n) | Value::Date(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Name(n) => write!(f, "{}", n),
            Value::Path(p) => write!(f, "{}", p),
            Value::Reference(k) | Value::WeakReference(k) => write!(f, "{}", k),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Name> for Value {
    fn from(n: Name) -> Self {
        Value::Name(n)
    }
}

impl From<Path> for Value {
    fn from(p: Path) -> Self {
        Value::Path(p)
    }
}

impl From<NodeKey> for Value {
    fn from(k: NodeKey) -> Self {
        Value::Reference(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_type_conversion_is_identity() {
        let v = Value::Long(7);
        assert_eq!(v.convert(PropertyType::Long).unwrap(), v);
        assert_eq!(v.convert(PropertyType::Undefined).unwrap(), v);
    }

    #[test]
    fn test_string_to_numbers() {
        assert_eq!(
            Value::from("42").convert(PropertyType::Long).unwrap(),
            Value::Long(42)
        );
        assert_eq!(
            Value::from("2.5").convert(PropertyType::Double).unwrap(),
            Value::Double(2.5)
        );
        assert!(Value::from("forty").convert(PropertyType::Long).is_err());
    }

    #[test]
    fn test_boolean_conversions() {
        assert_eq!(
            Value::from("TRUE").convert(PropertyType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert!(Value::Long(1).convert(PropertyType::Boolean).is_err());
    }

    #[test]
    fn test_reference_conversions() {
        let key = NodeKey::new();
        let weak = Value::WeakReference(key);
        assert_eq!(
            weak.convert(PropertyType::Reference).unwrap(),
            Value::Reference(key)
        );
        assert_eq!(
            Value::String(key.to_string())
                .convert(PropertyType::Reference)
                .unwrap()
                .as_key(),
            Some(key)
        );
        assert!(Value::Long(3).convert(PropertyType::Reference).is_err());
    }

    #[test]
    fn test_name_and_path_conversions() {
        assert_eq!(
            Value::from("jcr:title").convert(PropertyType::Name).unwrap(),
            Value::Name(Name::from("jcr:title"))
        );
        assert!(Value::from("a/b").convert(PropertyType::Name).is_err());
        assert_eq!(
            Value::from("/a/b").convert(PropertyType::Path).unwrap(),
            Value::Path(Path::parse("/a/b").unwrap())
        );
    }

    #[test]
    fn test_conversion_error_message() {
        let err = Value::Boolean(true).convert(PropertyType::Long).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"cannot convert Boolean value 'true' to Long");
    }

    #[test]
    fn test_property_type_parse() {
        assert_eq!("weakreference".parse::<PropertyType>().unwrap(), PropertyType::WeakReference);
        assert_eq!(PropertyType::Uri.to_string(), "URI");
        assert!("nope".parse::<PropertyType>().is_err());
    }

    #[test]
    fn test_serde_tags_values() {
        let json = serde_json::to_string(&Value::Long(5)).unwrap();
        assert_eq!(json, r#"{"type":"Long","value":5}"#);
    }
}
