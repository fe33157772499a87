/// Render a byte count the way file listings show it: `0 Bytes`, `1.5 KB`, `12.34 MB`.
///
/// Uses 1024-based units and at most two decimals, trailing zeros dropped.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut exponent = 0usize;
    let mut value = bytes as f64;
    while value >= 1024.0 && exponent < UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    let mut rendered = format!("{:.2}", rounded);
    while rendered.ends_with('0') {
        rendered.pop();
    }
    if rendered.ends_with('.') {
        rendered.pop();
    }
    format!("{} {}", rendered, UNITS[exponent])
}

/// Human label for an upload cap, e.g. `100MB`.
pub fn format_size_limit(bytes: u64) -> String {
    format_file_size(bytes).replace(' ', "")
}
