pub(crate) mod ai_client;
pub(crate) mod export;
pub(crate) mod generation;
pub(crate) mod normalizer;
pub(crate) mod papers;
pub(crate) mod selection;
