//! Expansion of `BZX_FORMAT_URL` templates.

use bzx_domain::Platform;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatUrlError {
    #[error("trailing %")]
    Trailing,
    #[error("unknown placeholder %{0}")]
    UnknownPlaceholder(char),
}

/// Expands `%e` (executable suffix), `%h` (pinned sha256), `%m` (machine),
/// `%o` (operating system), `%v` (version) and `%%`.
///
/// # Errors
/// Fails on a trailing `%` or any other placeholder.
pub fn build_url(
    format: &str,
    version: &str,
    platform: &Platform,
    pinned_sha256: Option<&str>,
) -> Result<String, FormatUrlError> {
    let mut url = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            url.push(c);
            continue;
        }
        match chars.next().ok_or(FormatUrlError::Trailing)? {
            'e' => url.push_str(platform.executable_suffix()),
            'h' => url.push_str(pinned_sha256.unwrap_or_default()),
            'm' => url.push_str(platform.machine_name(version).as_str()),
            'o' => url.push_str(platform.os.as_str()),
            'v' => url.push_str(version),
            '%' => url.push('%'),
            other => return Err(FormatUrlError::UnknownPlaceholder(other)),
        }
    }
    Ok(url)
}
