pub(crate) mod findings;
pub(crate) mod health;
pub(crate) mod reports;
pub(crate) mod scans;
pub(crate) mod streams;
pub(crate) mod targets;
pub(crate) mod users;
