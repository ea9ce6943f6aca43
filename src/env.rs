use std::collections::BTreeMap;
use std::path::Path;

use crate::Result;

/// Key/value configuration source: a parsed `.env` file overlaid on the
/// process environment. Blank values count as unset in both layers.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(|key| key.as_str()).collect();
        f.debug_struct("Env").field("dotenv_keys", &keys).finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn from_dotenv_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse_dotenv(&contents))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    /// First non-empty value across `keys`, in order.
    pub fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quotes_exports_and_comments() {
        let parsed = parse_dotenv(
            "# comment\nexport JIMENG_ACCESS_KEY=\"ak\"\nJIMENG_SECRET_KEY='sk'\nEMPTY=\nnot a pair\n",
        );
        assert_eq!(parsed.get("JIMENG_ACCESS_KEY").map(String::as_str), Some("ak"));
        assert_eq!(parsed.get("JIMENG_SECRET_KEY").map(String::as_str), Some("sk"));
        assert!(!parsed.contains_key("EMPTY"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn first_prefers_earlier_aliases() {
        let env = Env::parse_dotenv("QP_TEST_SECOND=two\nQP_TEST_THIRD=three\n");
        assert_eq!(
            env.first(&["QP_TEST_FIRST_UNSET", "QP_TEST_SECOND", "QP_TEST_THIRD"]),
            Some("two".to_string())
        );
        assert_eq!(env.first(&["QP_TEST_FIRST_UNSET"]), None);
    }
}
