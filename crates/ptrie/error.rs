use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("key length {0} exceeds the maximum of 65535 bytes")]
    KeyTooLong(usize),
    #[error("entry {0} is not live in this trie")]
    StaleEntry(usize),
}
