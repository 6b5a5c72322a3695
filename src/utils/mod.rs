pub(crate) mod rtc;
pub(crate) mod ws;
