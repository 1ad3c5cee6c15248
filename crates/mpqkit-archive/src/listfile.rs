//! `(listfile)` parsing and generation
//!
//! The listfile is an ordinary stored file holding the paths of the other
//! files, separated by `;`, CR or LF.

/// Name of the listfile inside an archive
pub const LISTFILE_NAME: &str = "(listfile)";

/// Split listfile contents into paths, skipping blank entries
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub fn parse(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split([';', '\r', '\n'])
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Build listfile contents, one path per CRLF-terminated line
pub fn build<S: AsRef<str>>(names: &[S]) -> Vec<u8> {
    let mut data = String::new();
    for name in names {
        data.push_str(name.as_ref());
        data.push_str("\r\n");
    }
    data.into_bytes()
}
