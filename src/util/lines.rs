use std::future::Future;

use super::process_sequentially;

/// Non-empty lines of `text`. Any run of `\r` and `\n` separates lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .collect()
}

/// Process each non-empty line of `text` in order, stopping at the first
/// error.
pub async fn for_each_line<'a, F, Fut, R, E>(text: &'a str, op: F) -> Result<(), E>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    process_sequentially(&split_lines(text), op).await
}
