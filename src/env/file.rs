//! `.env` file parser

use crate::error::{Result, StackError};
use std::path::Path;

/// Default env file name, looked up next to the compose file
pub const DEFAULT_ENV_FILE: &str = ".env";

/// `.env` file parser
pub struct EnvFile;

impl EnvFile {
    /// Load and parse an env file from disk
    pub fn load(path: &Path) -> Result<Vec<(String, String)>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::EnvFileNotFound(path.to_path_buf())
            } else {
                StackError::Io(e)
            }
        })?;

        Self::parse_str(&content, path)
    }

    /// Parse env file content. `path` is only used for error reporting.
    ///
    /// Entries are returned in file order; a key assigned twice keeps both
    /// entries and the later one wins when applied to an environment.
    pub fn parse_str(content: &str, path: &Path) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fail = |message: &str| StackError::EnvFileParse {
                path: path.to_path_buf(),
                line: idx + 1,
                message: message.to_string(),
            };

            let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| fail("expected KEY=VALUE"))?;

            let key = key.trim();
            if !is_valid_key(key) {
                return Err(fail(&format!("invalid variable name '{}'", key)));
            }

            let value = parse_value(value.trim_start()).map_err(|m| fail(&m))?;
            entries.push((key.to_string(), value));
        }

        Ok(entries)
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn parse_value(raw: &str) -> std::result::Result<String, String> {
    if let Some(rest) = raw.strip_prefix('\'') {
        let end = rest
            .find('\'')
            .ok_or_else(|| "unterminated single-quoted value".to_string())?;
        return Ok(rest[..end].to_string());
    }

    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return Ok(value),
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                _ => value.push(c),
            }
        }
        return Err("unterminated double-quoted value".to_string());
    }

    // Unquoted: an inline comment needs leading whitespace
    let value = match raw.find(" #").or_else(|| raw.find("\t#")) {
        Some(pos) => &raw[..pos],
        None => raw,
    };

    Ok(value.trim_end().to_string())
}
