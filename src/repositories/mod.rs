pub(crate) mod papers;
pub(crate) mod questions;
