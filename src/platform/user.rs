use std::env;

/// Name used as the suffix of generated trace names.
///
/// Characters that are not valid in file names are replaced with `_`.
pub fn current_user_name() -> String {
    let raw = env::var("USERNAME")
        .or_else(|_| env::var("USER"))
        .unwrap_or_default();

    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "trace".to_string()
    } else {
        cleaned
    }
}
