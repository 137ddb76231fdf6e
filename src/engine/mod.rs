pub mod dispatch;
pub mod earnings;
pub mod eta;
pub mod lifecycle;
pub mod payouts;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;
