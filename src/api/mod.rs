pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod papers;
pub(crate) mod router;
