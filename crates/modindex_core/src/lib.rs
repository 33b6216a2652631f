pub mod batch;
pub mod config;
pub mod detect;
pub mod error;
pub mod host;
pub mod publish;
pub mod reconcile;
pub mod scan;

#[cfg(test)]
mod test_support;
