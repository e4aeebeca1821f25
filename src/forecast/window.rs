//! Fixed-length training windows over an ordered value history.

/// Length of every model input window.
pub const WINDOW_LEN: usize = 20;

/// One training sample: `len` consecutive values and the value that followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub input: Vec<u8>,
    pub label: u8,
}

/// Build sliding windows from `values` ordered oldest to newest.
///
/// Emits `values.len() - len` windows, none when `values.len() <= len`.
pub fn build_windows(values: &[u8], len: usize) -> Vec<Window> {
    if len == 0 || values.len() <= len {
        return Vec::new();
    }
    (len..values.len())
        .map(|i| Window {
            input: values[i - len..i].to_vec(),
            label: values[i],
        })
        .collect()
}

/// The most recent `len` values, left-padded with zeros when history is short.
pub fn latest_window(values: &[u8], len: usize) -> Vec<u8> {
    let tail = &values[values.len().saturating_sub(len)..];
    let mut window = vec![0; len - tail.len()];
    window.extend_from_slice(tail);
    window
}
