pub(crate) mod kvb;
pub(crate) mod postgres;
