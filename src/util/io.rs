use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Serialize a value to the canonical on-store JSON form: sorted keys,
/// 4-space indent, non-ASCII preserved, trailing newline.
///
/// Sorted keys come from round-tripping through `serde_json::Value`,
/// whose object map is ordered by key.
pub fn to_canonical_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    let mut text = String::from_utf8(out).expect("serde_json emits valid UTF-8");
    text.push('\n');
    Ok(text)
}

/// Read a JSON-serialized file into an object.
pub fn read_serialized<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|err| err.into())
}

/// Write the given object as canonical JSON. Creates the file if it
/// doesn't exist, otherwise overwrites it.
pub fn write_serialized<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    let text = to_canonical_json(value)?;
    writer.write_all(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        zebra: u32,
        apple: &'static str,
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let text = to_canonical_json(&Sample {
            zebra: 1,
            apple: "Zoë",
        })
        .unwrap();
        assert_eq!(text, "{\n    \"apple\": \"Zoë\",\n    \"zebra\": 1\n}\n");
    }
}
