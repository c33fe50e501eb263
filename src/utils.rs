use md5::{Digest, Md5};

/// APOP digest: lowercase hex MD5 over the greeting's timestamp banner followed by the secret.
pub fn get_apop_digest(timestamp: &str, password: &str) -> String {
    let hasher = Md5::new().chain(timestamp).chain(password);
    format!("{:x}", hasher.result())
}

/// Human readable byte count, as shown next to a message in transfer.
pub fn bytes_to_string(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Turns a status line into text fit for the user: drops the `+OK`/`-ERR`
/// marker and any control characters.
pub fn reply_text(status_line: &str) -> String {
    let marker_len = status_line
        .split(|c: char| c.is_whitespace())
        .next()
        .filter(|m| m.eq_ignore_ascii_case("+OK") || m.eq_ignore_ascii_case("-ERR"))
        .map_or(0, |m| m.len());
    let text = status_line[marker_len..].trim_start_matches(|c| c == '+' || c == '-');
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
