use std::convert::TryFrom;

use anyhow::{anyhow, Result};

pub fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

/// JSON1 path for a top-level key; quoted so keys with spaces still resolve.
pub fn json_field_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_path_quotes_the_key() {
        assert_eq!(json_field_path("lat"), "$.\"lat\"");
        assert_eq!(json_field_path("Wind Angle"), "$.\"Wind Angle\"");
    }
}
