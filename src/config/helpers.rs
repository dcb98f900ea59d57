use serde::{Deserialize, Deserializer};

/// Accept a YAML scalar of any type where a string is expected.
///
/// `version: 1`, `cpu_limit: 1.5` and `value: true` are all common in
/// hand-written files; they are stored as their string form and validated
/// later instead of failing deserialization.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        None => String::new(),
        Some(Scalar::Str(s)) => s,
        Some(Scalar::Int(i)) => i.to_string(),
        Some(Scalar::Float(f)) => f.to_string(),
        Some(Scalar::Bool(b)) => b.to_string(),
    })
}

pub(crate) fn is_empty(s: &str) -> bool {
    s.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "lenient_string")]
        value: String,
    }

    #[test]
    fn test_lenient_scalars() {
        let cases = [
            ("value: abc", "abc"),
            ("value: 1", "1"),
            ("value: 1.5", "1.5"),
            ("value: true", "true"),
            ("value: ~", ""),
            ("{}", ""),
        ];
        for (yaml, expected) in cases {
            let holder: Holder = serde_yml::from_str(yaml).unwrap();
            assert_eq!(holder.value, expected, "input: {yaml}");
        }
    }
}
