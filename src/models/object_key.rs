//! Storage keys for uploaded files.

use crate::errors::{OssError, OssResult};
use chrono::{Local, NaiveDate};
use std::fmt;
use uuid::Uuid;

/// A key identifying one object inside the configured bucket.
///
/// Generated keys look like `2024/05/17/3f2a...c9.png`: a date prefix keeps
/// uploads grouped by day, the random 128-bit id keeps concurrent uploads apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Derive a fresh key for `original_name` using today's local date.
    pub fn generate(original_name: &str) -> OssResult<Self> {
        Self::generate_on(original_name, Local::now().date_naive())
    }

    /// Same as [`ObjectKey::generate`] with an explicit date.
    pub fn generate_on(original_name: &str, date: NaiveDate) -> OssResult<Self> {
        let suffix = original_name
            .rfind('.')
            .map(|pos| &original_name[pos..])
            .ok_or_else(|| {
                OssError::InvalidInput(format!(
                    "file name `{original_name}` has no extension"
                ))
            })?;
        let id = Uuid::new_v4().simple();
        Ok(Self(format!("{}{}{}", date.format("%Y/%m/%d/"), id, suffix)))
    }

    /// Wrap a key that already exists in the bucket.
    pub fn from_existing(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The segment after the last `/`, used as the local file name on download.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_layout_is_date_then_id_then_suffix() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let key = ObjectKey::generate_on("holiday.photo.JPG", date).unwrap();
        let s = key.as_str();

        assert!(s.starts_with("2024/03/07/"), "{s}");
        assert!(s.ends_with(".JPG"), "{s}");
        let id = &s["2024/03/07/".len()..s.len() - ".JPG".len()];
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn names_without_extension_are_rejected() {
        let err = ObjectKey::generate("README").unwrap_err();
        assert!(matches!(err, OssError::InvalidInput(_)));
    }

    #[test]
    fn file_name_is_last_segment() {
        let key = ObjectKey::from_existing("2024/01/02/abc.txt");
        assert_eq!(key.file_name(), "abc.txt");
        assert_eq!(ObjectKey::from_existing("flat.txt").file_name(), "flat.txt");
    }

    #[test]
    fn ten_thousand_keys_never_collide() {
        let keys: HashSet<ObjectKey> = (0..10_000)
            .map(|_| ObjectKey::generate("report.pdf").unwrap())
            .collect();
        assert_eq!(keys.len(), 10_000);
    }
}
