//! Value sanitizers for everything interpolated into generated CSS or markup.
//!
//! Nothing user-supplied reaches the document without passing through one of
//! these helpers: colours must match a strict grammar, font families are
//! restricted to a safe alphabet, and text and attributes are escaped.

const NAMED_COLORS: &[&str] = &[
    "black",
    "white",
    "transparent",
    "red",
    "green",
    "blue",
    "yellow",
    "orange",
    "purple",
    "pink",
    "gray",
    "grey",
    "silver",
    "maroon",
    "navy",
    "teal",
    "olive",
    "lime",
    "aqua",
    "fuchsia",
    "brown",
    "beige",
    "ivory",
    "gold",
];

/// Accept `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()`/`rgba()` with
/// numeric components, or a small set of named colours.
pub fn sanitize_color(raw: &str) -> Option<String> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }

    if let Some(hex) = value.strip_prefix('#') {
        let valid_len = matches!(hex.len(), 3 | 4 | 6 | 8);
        return (valid_len && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(value);
    }

    if let Some(inner) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_rgb_components(inner).then_some(value);
    }

    NAMED_COLORS.contains(&value.as_str()).then_some(value)
}

fn parse_rgb_components(inner: &str) -> bool {
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if !(parts.len() == 3 || parts.len() == 4) {
        return false;
    }

    let channels_ok = parts[..3].iter().all(|part| {
        let (number, max) = match part.strip_suffix('%') {
            Some(number) => (number, 100.0),
            None => (*part, 255.0),
        };
        number
            .parse::<f64>()
            .is_ok_and(|n| n.is_finite() && (0.0..=max).contains(&n))
    });

    let alpha_ok = parts.get(3).is_none_or(|alpha| {
        alpha
            .parse::<f64>()
            .is_ok_and(|a| a.is_finite() && (0.0..=1.0).contains(&a))
    });

    channels_ok && alpha_ok
}

/// Restrict a font family list to characters that cannot break out of a
/// declaration. Returns `None` when nothing usable remains.
pub fn sanitize_font_family(raw: &str) -> Option<String> {
    let families: Vec<String> = raw
        .split(',')
        .map(|family| {
            family
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
                .collect::<String>()
        })
        .map(|family| family.trim().to_string())
        .filter(|family| !family.is_empty())
        .collect();

    if families.is_empty() {
        return None;
    }

    Some(
        families
            .into_iter()
            .map(|family| format!("\"{family}\""))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Escape text content and attribute values alike.
pub fn escape(raw: &str) -> String {
    ammonia::clean_text(raw)
}

/// Image sources may be absolute http(s) URLs, inline raster data, or blob
/// locators (relative keys without a scheme).
pub fn sanitize_image_source(raw: &str) -> Option<String> {
    let source = raw.trim();
    if source.is_empty() {
        return None;
    }

    let lower = source.to_ascii_lowercase();
    let allowed = lower.starts_with("https://")
        || lower.starts_with("http://")
        || lower.starts_with("data:image/")
        || (!lower.contains(':') && !lower.starts_with("//"));

    allowed.then(|| escape(source))
}

/// Format a CSS length with two decimals, trimming trailing zeros.
pub fn px(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let mut text = format!("{rounded:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    if text == "-0" {
        text = "0".to_string();
    }
    format!("{text}px")
}

/// Format a unitless number the same way `px` does.
pub fn number(value: f64) -> String {
    let formatted = px(value);
    formatted.trim_end_matches("px").to_string()
}
