//! Read and write halves of a provider connection.

pub(crate) mod read;
pub(crate) mod write;
