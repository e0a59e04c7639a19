pub mod attachments;
pub mod deliver;
pub mod fetch;
pub mod run;
pub mod sources;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod webhook;

#[cfg(test)]
mod pipeline_tests;
