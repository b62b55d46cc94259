//! Checked conversions between rust and sql values.

/// Scores must be finite: SQLite stores NaN as NULL and `MAX()` ignores it.
pub fn finite_f64(i: f64) -> Result<f64, String> {
    if i.is_finite() {
        Ok(i)
    } else {
        Err(format!("score {i} is not a finite number"))
    }
}

pub fn i64_to_timestamp(i: i64) -> Result<i64, String> {
    if i < 0 {
        Err("timestamp is negative".to_string())
    } else {
        Ok(i)
    }
}

pub fn non_empty_name(i: &str) -> Result<&str, String> {
    if i.is_empty() {
        Err("author name is empty".to_string())
    } else {
        Ok(i)
    }
}
