// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Datatype libraries.
//!
//! Two libraries are understood. The built-in library (empty URI) knows
//! `string` and `token` and takes no parameters. The XML Schema datatypes
//! library knows the string, name, numeric, calendar, and binary types,
//! restricted through the `pattern`, length, and bound facets.

use chrono::NaiveDate;
use regex::Regex;

use super::xsd_regex::{self, PatternError};

/// URI of the built-in datatype library.
pub const BUILTIN_LIBRARY: &str = "";

/// URI of the XML Schema datatype library.
pub const XSD_LIBRARY: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

const TIMEZONE: &str = r"(?:Z|[+-]\d{2}:\d{2})?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhiteSpace {
    Preserve,
    Replace,
    Collapse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    NmToken,
    QName,
    AnyUri,
    Boolean,
    Decimal,
    Integer { min: Option<i128>, max: Option<i128> },
    Float,
    Date,
    DateTime,
    Time,
    GYear,
    GYearMonth,
    GMonth,
    GDay,
    GMonthDay,
    Duration,
    HexBinary,
    Base64Binary,
}

impl Kind {
    fn from_xsd(name: &str) -> Option<Self> {
        let integer = |min: Option<i128>, max: Option<i128>| Kind::Integer { min, max };
        let kind = match name {
            "string" => Kind::String,
            "normalizedString" => Kind::NormalizedString,
            "token" => Kind::Token,
            "language" => Kind::Language,
            "Name" => Kind::Name,
            "NCName" | "ID" | "IDREF" | "ENTITY" => Kind::NcName,
            "NMTOKEN" => Kind::NmToken,
            "QName" => Kind::QName,
            "anyURI" => Kind::AnyUri,
            "boolean" => Kind::Boolean,
            "decimal" => Kind::Decimal,
            "integer" => integer(None, None),
            "nonNegativeInteger" => integer(Some(0), None),
            "positiveInteger" => integer(Some(1), None),
            "nonPositiveInteger" => integer(None, Some(0)),
            "negativeInteger" => integer(None, Some(-1)),
            "long" => integer(Some(i64::MIN.into()), Some(i64::MAX.into())),
            "int" => integer(Some(i32::MIN.into()), Some(i32::MAX.into())),
            "short" => integer(Some(i16::MIN.into()), Some(i16::MAX.into())),
            "byte" => integer(Some(i8::MIN.into()), Some(i8::MAX.into())),
            "unsignedLong" => integer(Some(0), Some(u64::MAX.into())),
            "unsignedInt" => integer(Some(0), Some(u32::MAX.into())),
            "unsignedShort" => integer(Some(0), Some(u16::MAX.into())),
            "unsignedByte" => integer(Some(0), Some(u8::MAX.into())),
            "float" | "double" => Kind::Float,
            "date" => Kind::Date,
            "dateTime" => Kind::DateTime,
            "time" => Kind::Time,
            "gYear" => Kind::GYear,
            "gYearMonth" => Kind::GYearMonth,
            "gMonth" => Kind::GMonth,
            "gDay" => Kind::GDay,
            "gMonthDay" => Kind::GMonthDay,
            "duration" => Kind::Duration,
            "hexBinary" => Kind::HexBinary,
            "base64Binary" => Kind::Base64Binary,
            _ => return None,
        };

        Some(kind)
    }

    fn white_space(self) -> WhiteSpace {
        match self {
            Kind::String => WhiteSpace::Preserve,
            Kind::NormalizedString => WhiteSpace::Replace,
            _ => WhiteSpace::Collapse,
        }
    }

    fn lexical(self) -> Option<String> {
        let pattern = match self {
            Kind::String | Kind::NormalizedString | Kind::Token | Kind::AnyUri => return None,
            Kind::Language => r"[a-zA-Z]{1,8}(?:-[a-zA-Z0-9]{1,8})*".to_string(),
            Kind::Name => r"[:_\p{L}][-.:_\p{L}\p{N}\p{M}]*".to_string(),
            Kind::NcName => r"[_\p{L}][-._\p{L}\p{N}\p{M}]*".to_string(),
            Kind::NmToken => r"[-.:_\p{L}\p{N}\p{M}]+".to_string(),
            Kind::QName => r"(?:[_\p{L}][-._\p{L}\p{N}\p{M}]*:)?[_\p{L}][-._\p{L}\p{N}\p{M}]*"
                .to_string(),
            Kind::Boolean => r"true|false|1|0".to_string(),
            Kind::Decimal => r"[+-]?(?:\d+(?:\.\d*)?|\.\d+)".to_string(),
            Kind::Integer { .. } => r"[+-]?\d+".to_string(),
            Kind::Float => r"[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?|INF|-INF|NaN".to_string(),
            Kind::Date => format!(r"-?\d{{4,}}-\d{{2}}-\d{{2}}{TIMEZONE}"),
            Kind::DateTime => {
                format!(r"-?\d{{4,}}-\d{{2}}-\d{{2}}T\d{{2}}:\d{{2}}:\d{{2}}(?:\.\d+)?{TIMEZONE}")
            }
            Kind::Time => format!(r"\d{{2}}:\d{{2}}:\d{{2}}(?:\.\d+)?{TIMEZONE}"),
            Kind::GYear => format!(r"-?\d{{4,}}{TIMEZONE}"),
            Kind::GYearMonth => format!(r"-?\d{{4,}}-(?:0[1-9]|1[0-2]){TIMEZONE}"),
            Kind::GMonth => format!(r"--(?:0[1-9]|1[0-2]){TIMEZONE}"),
            Kind::GDay => format!(r"---(?:0[1-9]|[12]\d|3[01]){TIMEZONE}"),
            Kind::GMonthDay => format!(r"--(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01]){TIMEZONE}"),
            Kind::Duration => {
                r"-?P(?:\d+Y)?(?:\d+M)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?"
                    .to_string()
            }
            Kind::HexBinary => r"(?:[0-9a-fA-F]{2})*".to_string(),
            Kind::Base64Binary => r"[A-Za-z0-9+/ ]*=? ?=?".to_string(),
        };

        Some(format!("^(?:{pattern})$"))
    }

    fn is_numeric(self) -> bool {
        matches!(self, Kind::Decimal | Kind::Integer { .. } | Kind::Float)
    }
}

#[derive(Debug, Clone)]
enum Facet {
    Pattern(Regex),
    Length(usize),
    MinLength(usize),
    MaxLength(usize),
    MinInclusive(f64),
    MaxInclusive(f64),
    MinExclusive(f64),
    MaxExclusive(f64),
}

/// Datatype of `data` and `value` patterns.
#[derive(Debug, Clone)]
pub struct Datatype {
    name: String,
    kind: Kind,
    lexical: Option<Regex>,
    facets: Vec<Facet>,
}

impl Datatype {
    /// Look up datatype in library and restrict it by parameters.
    ///
    /// # Errors
    ///
    /// - Return [`DatatypeError::UnknownLibrary`] or
    ///   [`DatatypeError::UnknownType`] if the datatype does not exist.
    /// - Return [`DatatypeError::ParamsNotAllowed`],
    ///   [`DatatypeError::UnknownParam`], or [`DatatypeError::InvalidParam`] if
    ///   a parameter cannot restrict the datatype.
    pub fn new(library: &str, name: &str, params: &[(String, String)]) -> Result<Self> {
        let kind = match library {
            BUILTIN_LIBRARY => {
                if !params.is_empty() {
                    return Err(DatatypeError::ParamsNotAllowed {
                        name: name.to_string(),
                    });
                }

                match name {
                    "string" => Kind::String,
                    "token" => Kind::Token,
                    _ => {
                        return Err(DatatypeError::UnknownType {
                            library: library.to_string(),
                            name: name.to_string(),
                        })
                    }
                }
            }
            XSD_LIBRARY => Kind::from_xsd(name).ok_or_else(|| DatatypeError::UnknownType {
                library: library.to_string(),
                name: name.to_string(),
            })?,
            _ => return Err(DatatypeError::UnknownLibrary(library.to_string())),
        };

        let lexical = kind
            .lexical()
            .map(|pattern| Regex::new(&pattern))
            .transpose()
            .map_err(|err| DatatypeError::InvalidPattern {
                source: Box::new(err.into()),
                pattern: name.to_string(),
            })?;

        let facets = params
            .iter()
            .map(|(param, value)| facet(kind, name, param, value))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            kind,
            lexical,
            facets,
        })
    }

    /// Built-in `token` datatype, the default of `value` patterns.
    pub fn token() -> Self {
        Self {
            name: "token".to_string(),
            kind: Kind::Token,
            lexical: None,
            facets: Vec::new(),
        }
    }

    /// Name of datatype within its library.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if text is a valid literal of this datatype.
    pub fn allows(&self, text: &str) -> bool {
        let value = normalize(self.kind.white_space(), text);

        if let Some(lexical) = &self.lexical {
            if !lexical.is_match(&value) {
                return false;
            }
        }

        if !self.in_value_space(&value) {
            return false;
        }

        self.facets.iter().all(|facet| self.satisfies(facet, &value))
    }

    /// Check if two literals denote the same value.
    ///
    /// Both literals must be allowed by this datatype.
    pub fn equal(&self, lhs: &str, rhs: &str) -> bool {
        if !self.allows(rhs) {
            return false;
        }

        let white_space = self.kind.white_space();
        let lhs = normalize(white_space, lhs);
        let rhs = normalize(white_space, rhs);

        match self.kind {
            Kind::Boolean => boolean(&lhs) == boolean(&rhs),
            Kind::Integer { .. } => match (lhs.parse::<i128>(), rhs.parse::<i128>()) {
                (Ok(lhs), Ok(rhs)) => lhs == rhs,
                _ => lhs.trim_start_matches('+') == rhs.trim_start_matches('+'),
            },
            Kind::Decimal | Kind::Float => match (number(&lhs), number(&rhs)) {
                (Some(lhs), Some(rhs)) => lhs == rhs,
                _ => lhs == rhs,
            },
            _ => lhs == rhs,
        }
    }

    fn in_value_space(&self, value: &str) -> bool {
        match self.kind {
            Kind::Integer { min, max } => match value.parse::<i128>() {
                Ok(number) => {
                    min.is_none_or(|min| number >= min) && max.is_none_or(|max| number <= max)
                }
                Err(_) => min.is_none() && max.is_none(),
            },
            Kind::Date | Kind::DateTime => match value.get(..10) {
                Some(date) if value.as_bytes().get(4) == Some(&b'-') => {
                    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
                }
                _ => true,
            },
            Kind::Duration => value.trim_start_matches('-') != "P" && !value.ends_with('T'),
            Kind::Base64Binary => {
                value.chars().filter(|chr| !chr.is_whitespace()).count() % 4 == 0
            }
            _ => true,
        }
    }

    fn satisfies(&self, facet: &Facet, value: &str) -> bool {
        match facet {
            Facet::Pattern(pattern) => pattern.is_match(value),
            Facet::Length(length) => self.measure(value) == *length,
            Facet::MinLength(length) => self.measure(value) >= *length,
            Facet::MaxLength(length) => self.measure(value) <= *length,
            Facet::MinInclusive(bound) => number(value).is_some_and(|number| number >= *bound),
            Facet::MaxInclusive(bound) => number(value).is_some_and(|number| number <= *bound),
            Facet::MinExclusive(bound) => number(value).is_some_and(|number| number > *bound),
            Facet::MaxExclusive(bound) => number(value).is_some_and(|number| number < *bound),
        }
    }

    fn measure(&self, value: &str) -> usize {
        match self.kind {
            Kind::HexBinary => value.len() / 2,
            Kind::Base64Binary => {
                let symbols: Vec<char> = value.chars().filter(|chr| !chr.is_whitespace()).collect();
                let padding = symbols.iter().rev().take_while(|chr| **chr == '=').count();
                ((symbols.len() / 4) * 3).saturating_sub(padding.min(2))
            }
            _ => value.chars().count(),
        }
    }
}

fn facet(kind: Kind, name: &str, param: &str, value: &str) -> Result<Facet> {
    let invalid = || DatatypeError::InvalidParam {
        param: param.to_string(),
        value: value.to_string(),
    };
    let length = || value.trim().parse::<usize>().map_err(|_| invalid());
    let bound = || {
        if !kind.is_numeric() {
            return Err(DatatypeError::UnknownParam {
                param: param.to_string(),
                name: name.to_string(),
            });
        }
        number(value.trim()).ok_or_else(invalid)
    };

    let facet = match param {
        "pattern" => {
            let rejected = |err: PatternError| DatatypeError::InvalidPattern {
                source: Box::new(err),
                pattern: value.to_string(),
            };
            let translated = xsd_regex::translate(value).map_err(rejected)?;
            let regex = Regex::new(&format!("^(?:{translated})$"))
                .map_err(|err| rejected(err.into()))?;
            Facet::Pattern(regex)
        }
        "length" => Facet::Length(length()?),
        "minLength" => Facet::MinLength(length()?),
        "maxLength" => Facet::MaxLength(length()?),
        "minInclusive" => Facet::MinInclusive(bound()?),
        "maxInclusive" => Facet::MaxInclusive(bound()?),
        "minExclusive" => Facet::MinExclusive(bound()?),
        "maxExclusive" => Facet::MaxExclusive(bound()?),
        _ => {
            return Err(DatatypeError::UnknownParam {
                param: param.to_string(),
                name: name.to_string(),
            })
        }
    };

    Ok(facet)
}

fn normalize(white_space: WhiteSpace, text: &str) -> String {
    match white_space {
        WhiteSpace::Preserve => text.to_string(),
        WhiteSpace::Replace => text
            .chars()
            .map(|chr| if matches!(chr, '\t' | '\n' | '\r') { ' ' } else { chr })
            .collect(),
        WhiteSpace::Collapse => text.split_ascii_whitespace().collect::<Vec<_>>().join(" "),
    }
}

fn boolean(value: &str) -> bool {
    matches!(value, "true" | "1")
}

fn number(value: &str) -> Option<f64> {
    match value {
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        _ => value.parse::<f64>().ok(),
    }
}

/// Datatype lookup error types.
#[derive(Debug, thiserror::Error)]
pub enum DatatypeError {
    #[error("unknown datatype library {0:?}")]
    UnknownLibrary(String),

    #[error("unknown datatype {name:?} in library {library:?}")]
    UnknownType { library: String, name: String },

    #[error("datatype {name:?} takes no parameters")]
    ParamsNotAllowed { name: String },

    #[error("parameter {param:?} does not apply to datatype {name:?}")]
    UnknownParam { param: String, name: String },

    #[error("invalid value {value:?} for parameter {param:?}")]
    InvalidParam { param: String, value: String },

    #[error("invalid regular expression {pattern:?}")]
    InvalidPattern {
        #[source]
        source: Box<PatternError>,
        pattern: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DatatypeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn xsd(name: &str) -> Datatype {
        Datatype::new(XSD_LIBRARY, name, &[]).unwrap()
    }

    fn restricted(name: &str, params: &[(&str, &str)]) -> Datatype {
        let params: Vec<_> = params
            .iter()
            .map(|(param, value)| (param.to_string(), value.to_string()))
            .collect();
        Datatype::new(XSD_LIBRARY, name, &params).unwrap()
    }

    #[test_case("string", "  any\ttext ", true; "string preserves")]
    #[test_case("boolean", " true ", true; "boolean collapses")]
    #[test_case("boolean", "yes", false; "boolean rejects")]
    #[test_case("integer", "-42", true; "integer")]
    #[test_case("integer", "4.2", false; "integer fraction")]
    #[test_case("positiveInteger", "0", false; "positive zero")]
    #[test_case("nonNegativeInteger", "0", true; "non negative zero")]
    #[test_case("unsignedByte", "256", false; "byte overflow")]
    #[test_case("decimal", "3.14", true; "decimal")]
    #[test_case("double", "1e10", true; "double exponent")]
    #[test_case("date", "2024-02-29", true; "leap day")]
    #[test_case("date", "2023-02-29", false; "not leap day")]
    #[test_case("date", "2024-1-1", false; "short date")]
    #[test_case("dateTime", "2024-01-01T10:00:00Z", true; "date time")]
    #[test_case("NCName", "fedora-40", true; "ncname")]
    #[test_case("NCName", "a:b", false; "ncname colon")]
    #[test_case("hexBinary", "0aFF", true; "hex")]
    #[test_case("hexBinary", "0aF", false; "hex odd")]
    #[test_case("duration", "P1Y2M", true; "duration")]
    #[test_case("duration", "P", false; "empty duration")]
    #[test]
    fn xsd_lexical_space(name: &str, text: &str, expect: bool) {
        assert_eq!(xsd(name).allows(text), expect);
    }

    #[test_case(&[("pattern", "[0-9]+")], "123", true; "pattern match")]
    #[test_case(&[("pattern", "[0-9]+")], "12a", false; "pattern anchored")]
    #[test_case(&[("pattern", r"\i\c*")], "x86_64", true; "name escapes")]
    #[test_case(&[("pattern", "[a-z-[aeiou]]+")], "bad", false; "class subtraction")]
    #[test_case(&[("pattern", r"\p{IsBasicLatin}+")], "plain", true; "unicode block")]
    #[test_case(&[("minLength", "2"), ("maxLength", "3")], "abcd", false; "too long")]
    #[test_case(&[("length", "2")], "ab", true; "exact length")]
    #[test]
    fn string_facets(params: &[(&str, &str)], text: &str, expect: bool) {
        assert_eq!(restricted("string", params).allows(text), expect);
    }

    #[test]
    fn numeric_bounds() {
        let datatype = restricted("integer", &[("minInclusive", "1"), ("maxExclusive", "10")]);
        assert!(datatype.allows("1"));
        assert!(datatype.allows("9"));
        assert!(!datatype.allows("10"));
        assert!(!datatype.allows("0"));
    }

    #[test]
    fn value_equality() {
        assert!(Datatype::token().equal("x86_64", "  x86_64\n"));
        assert!(xsd("boolean").equal("true", "1"));
        assert!(xsd("integer").equal("10", "+010"));
        assert!(!xsd("string").equal("a", " a"));
    }

    #[test]
    fn rejects_unknown_datatypes() {
        assert!(matches!(
            Datatype::new(XSD_LIBRARY, "nope", &[]),
            Err(DatatypeError::UnknownType { .. })
        ));
        assert!(matches!(
            Datatype::new("urn:nope", "string", &[]),
            Err(DatatypeError::UnknownLibrary(_))
        ));
        assert!(matches!(
            Datatype::new(BUILTIN_LIBRARY, "string", &[("length".into(), "1".into())]),
            Err(DatatypeError::ParamsNotAllowed { .. })
        ));
        assert!(matches!(
            Datatype::new(XSD_LIBRARY, "string", &[("minInclusive".into(), "1".into())]),
            Err(DatatypeError::UnknownParam { .. })
        ));
    }

    #[test]
    fn rejects_untranslatable_pattern() {
        let params = [("pattern".to_string(), r"(a)\1".to_string())];
        assert!(matches!(
            Datatype::new(XSD_LIBRARY, "string", &params),
            Err(DatatypeError::InvalidPattern { .. })
        ));
    }
}
