//! Persistence helpers for run artifacts: atomic JSON writes and JSON-lines appends.
//!
//! Histories and configs are rewritten wholesale on every log event, so each
//! write goes to a `.tmp` sibling first and is renamed into place. A crash
//! mid-write leaves the previous file intact.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames to the target path.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
///
/// The parent directory must already exist; run folders are created once at
/// startup and never recreated implicitly.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Append one JSON value as a single line.
pub fn append_json_line<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let mut line = serde_json::to_string(data).map_err(io::Error::other)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Serde adapter for `f64` values that may be NaN or infinite.
///
/// JSON has no literal for those, so they are written as the strings `"NaN"`,
/// `"inf"` and `"-inf"`. Finite values stay plain numbers.
pub mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "expected a number, \"NaN\", \"inf\" or \"-inf\", got {other:?}"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        tag: String,
        step: u64,
    }

    #[test]
    fn test_atomic_write_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let data = Record {
            tag: "loss".into(),
            step: 42,
        };

        atomic_write_json(&path, &data).unwrap();
        let loaded: Option<Record> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn test_atomic_write_requires_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("log.json");
        assert!(atomic_write_json(&path, &1u32).is_err());
    }

    #[test]
    fn test_atomic_write_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        atomic_write_json(&path, &"test").unwrap();
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_append_json_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scalars.jsonl");

        for step in 0..3 {
            let rec = Record {
                tag: "train_loss".into(),
                step,
            };
            append_json_line(&path, &rec).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Record> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].step, 2);
    }

    #[test]
    fn test_load_json_nonexistent() {
        let result: io::Result<Option<Record>> = load_json(Path::new("/nonexistent/log.json"));
        assert!(result.unwrap().is_none());
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Reading(#[serde(with = "super::non_finite")] f64);

    #[test]
    fn test_non_finite_values_survive_json() {
        let json = serde_json::to_string(&[
            Reading(f64::NAN),
            Reading(f64::INFINITY),
            Reading(f64::NEG_INFINITY),
            Reading(0.5),
        ])
        .unwrap();
        assert_eq!(json, r#"["NaN","inf","-inf",0.5]"#);

        let back: Vec<Reading> = serde_json::from_str(&json).unwrap();
        assert!(back[0].0.is_nan());
        assert_eq!(back[1].0, f64::INFINITY);
        assert_eq!(back[2].0, f64::NEG_INFINITY);
        assert_eq!(back[3].0, 0.5);
        // Integers are accepted as numbers too.
        let whole: Reading = serde_json::from_str("3").unwrap();
        assert_eq!(whole.0, 3.0);
        assert!(serde_json::from_str::<Reading>(r#""nope""#).is_err());
    }
}
