pub(crate) mod envelope;
pub(crate) mod token;
