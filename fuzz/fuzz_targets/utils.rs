use std::str;

/// Cap on the bytes a single fuzz input may feed into the parser or the demux.
pub const MAX_INPUT_SIZE: usize = 64 * 1024;

/// Raw input capped at `MAX_INPUT_SIZE`, for targets that take bytes.
#[inline]
pub fn capped(data: &[u8]) -> &[u8] {
    &data[..data.len().min(MAX_INPUT_SIZE)]
}

/// Capped input as text, or `None` when it is not UTF-8.
///
/// A codepoint cut by the cap is dropped rather than rejecting the input.
#[allow(dead_code)]
pub fn capped_utf8(data: &[u8]) -> Option<&str> {
    let data = capped(data);
    match str::from_utf8(data) {
        Ok(text) => Some(text),
        // `error_len() == None` means the input ends inside a codepoint.
        Err(err) if err.error_len().is_none() => str::from_utf8(&data[..err.valid_up_to()]).ok(),
        Err(_) => None,
    }
}
