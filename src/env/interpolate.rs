//! Variable substitution for compose documents
//!
//! Supported forms:
//!
//! - `$NAME`, `${NAME}`
//! - `${NAME:-default}` / `${NAME-default}`: default when unset (or empty with `:`)
//! - `${NAME:?message}` / `${NAME?message}`: fail when unset (or empty with `:`)
//! - `${NAME:+alt}` / `${NAME+alt}`: `alt` when set (and non-empty with `:`)
//! - `$$` for a literal `$`
//!
//! Defaults and alternatives may themselves contain references.

use super::Environment;
use crate::error::{Result, StackError};
use serde_yaml::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// `-` / `:-`
    Default { strict: bool },
    /// `?` / `:?`
    Required { strict: bool },
    /// `+` / `:+`
    Alternative { strict: bool },
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Dollar,
    Var {
        name: &'a str,
        op: Option<Op>,
        arg: &'a str,
    },
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split a string into literal text and variable references
fn parse_segments(input: &str) -> Result<Vec<Segment<'_>>> {
    let bytes = input.as_bytes();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let Some(offset) = input[i..].find('$') else {
            segments.push(Segment::Literal(&input[i..]));
            break;
        };
        if offset > 0 {
            segments.push(Segment::Literal(&input[i..i + offset]));
        }
        i += offset;

        match bytes.get(i + 1) {
            Some(b'$') => {
                segments.push(Segment::Dollar);
                i += 2;
            }
            Some(b'{') => {
                let start = i + 2;
                let mut depth = 1;
                let mut end = None;
                for (j, b) in bytes.iter().enumerate().skip(start) {
                    match b {
                        b'{' => depth += 1,
                        b'}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(j);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| StackError::InvalidInterpolation(input.to_string()))?;
                segments.push(parse_braced(&input[start..end], input)?);
                i = end + 1;
            }
            Some(&b) if is_name_start(b) => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_name_char(bytes[end]) {
                    end += 1;
                }
                segments.push(Segment::Var {
                    name: &input[start..end],
                    op: None,
                    arg: "",
                });
                i = end;
            }
            _ => {
                // A lone `$` is kept as-is
                segments.push(Segment::Literal("$"));
                i += 1;
            }
        }
    }

    Ok(segments)
}

fn parse_braced<'a>(expr: &'a str, whole: &str) -> Result<Segment<'a>> {
    let bytes = expr.as_bytes();
    if bytes.is_empty() || !is_name_start(bytes[0]) {
        return Err(StackError::InvalidInterpolation(whole.to_string()));
    }

    let mut end = 1;
    while end < bytes.len() && is_name_char(bytes[end]) {
        end += 1;
    }
    let name = &expr[..end];
    let rest = &expr[end..];

    if rest.is_empty() {
        return Ok(Segment::Var { name, op: None, arg: "" });
    }

    let (strict, rest) = match rest.strip_prefix(':') {
        Some(r) => (true, r),
        None => (false, rest),
    };

    let op = match rest.as_bytes().first() {
        Some(b'-') => Op::Default { strict },
        Some(b'?') => Op::Required { strict },
        Some(b'+') => Op::Alternative { strict },
        _ => return Err(StackError::InvalidInterpolation(whole.to_string())),
    };

    Ok(Segment::Var {
        name,
        op: Some(op),
        arg: &rest[1..],
    })
}

/// Substitutes variables from an [`Environment`]
pub struct Interpolator<'a> {
    env: &'a Environment,
}

impl<'a> Interpolator<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Interpolate a single string
    pub fn interpolate_str(&self, input: &str) -> Result<String> {
        let mut missing = BTreeSet::new();
        let out = self.substitute(input, &mut missing)?;
        finish(missing)?;
        Ok(out)
    }

    /// Interpolate every string scalar and mapping key in a YAML tree.
    ///
    /// All undefined variables are reported together.
    pub fn interpolate_value(&self, value: &mut Value) -> Result<()> {
        let mut missing = BTreeSet::new();
        self.walk(value, &mut missing)?;
        finish(missing)
    }

    fn walk(&self, value: &mut Value, missing: &mut BTreeSet<String>) -> Result<()> {
        match value {
            Value::String(s) => {
                if s.contains('$') {
                    *s = self.substitute(s, missing)?;
                }
            }
            Value::Sequence(seq) => {
                for item in seq.iter_mut() {
                    self.walk(item, missing)?;
                }
            }
            Value::Mapping(map) => {
                let entries = std::mem::take(map);
                for (mut key, mut item) in entries {
                    self.walk(&mut key, missing)?;
                    self.walk(&mut item, missing)?;
                    map.insert(key, item);
                }
            }
            Value::Tagged(tagged) => self.walk(&mut tagged.value, missing)?,
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        Ok(())
    }

    fn substitute(&self, input: &str, missing: &mut BTreeSet<String>) -> Result<String> {
        let mut out = String::with_capacity(input.len());

        for segment in parse_segments(input)? {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Dollar => out.push('$'),
                Segment::Var { name, op, arg } => {
                    let value = self.env.get(name);
                    let is_set = |strict: bool| match value {
                        Some(v) => !strict || !v.is_empty(),
                        None => false,
                    };

                    match op {
                        None => match value {
                            Some(v) => out.push_str(v),
                            None => {
                                missing.insert(name.to_string());
                            }
                        },
                        Some(Op::Default { strict }) => {
                            if is_set(strict) {
                                out.push_str(value.unwrap_or_default());
                            } else {
                                out.push_str(&self.substitute(arg, missing)?);
                            }
                        }
                        Some(Op::Required { strict }) => {
                            if is_set(strict) {
                                out.push_str(value.unwrap_or_default());
                            } else {
                                return Err(StackError::RequiredVariable {
                                    name: name.to_string(),
                                    message: arg.to_string(),
                                });
                            }
                        }
                        Some(Op::Alternative { strict }) => {
                            if is_set(strict) {
                                out.push_str(&self.substitute(arg, missing)?);
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

fn finish(missing: BTreeSet<String>) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StackError::UndefinedVariables(missing.into_iter().collect()))
    }
}

/// Collect every variable name a YAML tree refers to, including names that
/// only appear inside defaults.
pub fn referenced_variables(value: &Value) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    collect_value(value, &mut names)?;
    Ok(names)
}

fn collect_value(value: &Value, names: &mut BTreeSet<String>) -> Result<()> {
    match value {
        Value::String(s) => collect_str(s, names)?,
        Value::Sequence(seq) => {
            for item in seq {
                collect_value(item, names)?;
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map {
                collect_value(key, names)?;
                collect_value(item, names)?;
            }
        }
        Value::Tagged(tagged) => collect_value(&tagged.value, names)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn collect_str(input: &str, names: &mut BTreeSet<String>) -> Result<()> {
    for segment in parse_segments(input)? {
        if let Segment::Var { name, arg, .. } = segment {
            names.insert(name.to_string());
            if !arg.is_empty() {
                collect_str(arg, names)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::from_pairs([
            ("ES_PORT", "9200"),
            ("STACK_VERSION", "8.11.3"),
            ("EMPTY", ""),
        ])
    }

    fn interp(input: &str) -> Result<String> {
        let env = env();
        Interpolator::new(&env).interpolate_str(input)
    }

    #[test]
    fn test_plain_and_braced_references() {
        assert_eq!(interp("${ES_PORT}:9200").unwrap(), "9200:9200");
        assert_eq!(interp("elasticsearch:$STACK_VERSION").unwrap(), "elasticsearch:8.11.3");
        assert_eq!(interp("no variables here").unwrap(), "no variables here");
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(
            interp("redis-cli -a $${REDIS_PASSWORD} ping").unwrap(),
            "redis-cli -a ${REDIS_PASSWORD} ping"
        );
        assert_eq!(interp("cost: 5$").unwrap(), "cost: 5$");
    }

    #[test]
    fn test_default_forms() {
        assert_eq!(interp("${MISSING:-7000}").unwrap(), "7000");
        assert_eq!(interp("${MISSING-7000}").unwrap(), "7000");
        assert_eq!(interp("${EMPTY:-fallback}").unwrap(), "fallback");
        assert_eq!(interp("${EMPTY-fallback}").unwrap(), "");
        assert_eq!(interp("${MISSING:-${ES_PORT}}").unwrap(), "9200");
    }

    #[test]
    fn test_alternative_forms() {
        assert_eq!(interp("${ES_PORT:+set}").unwrap(), "set");
        assert_eq!(interp("${EMPTY:+set}").unwrap(), "");
        assert_eq!(interp("${EMPTY+set}").unwrap(), "set");
        assert_eq!(interp("${MISSING+set}").unwrap(), "");
    }

    #[test]
    fn test_required_variable() {
        let err = interp("${MYSQL_PASSWORD:?set a database password}").unwrap_err();
        match err {
            StackError::RequiredVariable { name, message } => {
                assert_eq!(name, "MYSQL_PASSWORD");
                assert_eq!(message, "set a database password");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(interp("${EMPTY?must exist}").is_ok());
        assert!(interp("${EMPTY:?must be non-empty}").is_err());
    }

    #[test]
    fn test_undefined_variables_are_collected() {
        let env = env();
        let mut doc: Value = serde_yaml::from_str(
            r#"
ports:
  - ${MYSQL_PORT}:3306
  - ${REDIS_PORT}:6379
image: elasticsearch:${STACK_VERSION}
command: ${MYSQL_PORT}
"#,
        )
        .unwrap();

        let err = Interpolator::new(&env).interpolate_value(&mut doc).unwrap_err();
        match err {
            StackError::UndefinedVariables(names) => {
                assert_eq!(names, vec!["MYSQL_PORT".to_string(), "REDIS_PORT".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_interpolates_keys_and_nested_values() {
        let env = env();
        let mut doc: Value = serde_yaml::from_str(
            r#"
labels:
  port-${ES_PORT}: "${STACK_VERSION}"
retries: 3
"#,
        )
        .unwrap();

        Interpolator::new(&env).interpolate_value(&mut doc).unwrap();
        assert_eq!(doc["labels"]["port-9200"].as_str(), Some("8.11.3"));
        assert_eq!(doc["retries"].as_u64(), Some(3));
    }

    #[test]
    fn test_malformed_references() {
        assert!(matches!(
            interp("${ES_PORT"),
            Err(StackError::InvalidInterpolation(_))
        ));
        assert!(matches!(interp("${}"), Err(StackError::InvalidInterpolation(_))));
        assert!(matches!(
            interp("${ES_PORT/x}"),
            Err(StackError::InvalidInterpolation(_))
        ));
    }

    #[test]
    fn test_referenced_variables() {
        let doc: Value = serde_yaml::from_str(
            r#"
image: elasticsearch:${STACK_VERSION}
ports: ["${ES_PORT:-${FALLBACK_PORT}}:9200"]
healthcheck: ["CMD-SHELL", "echo $${NOT_A_REFERENCE} $TZ"]
"#,
        )
        .unwrap();

        let names: Vec<String> = referenced_variables(&doc).unwrap().into_iter().collect();
        assert_eq!(names, vec!["ES_PORT", "FALLBACK_PORT", "STACK_VERSION", "TZ"]);
    }
}
