use std::ascii;

use itertools::Itertools;

/// Renders bytes as printable ASCII, escaping everything else, for logs and
/// error messages.
pub(crate) fn escape_bytes(input: &[u8]) -> String {
    input
        .iter()
        .flat_map(|&c| ascii::escape_default(c))
        .map(char::from)
        .collect()
}

/// Renders a queue list for logs, e.g. `urgent,high,low`.
pub(crate) fn join_queues<Q: AsRef<str>>(queues: &[Q]) -> String {
    queues.iter().map(AsRef::as_ref).join(",")
}
