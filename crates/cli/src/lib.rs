//! Request building and terminal rendering for the `clinical` binary.
pub mod report;
pub mod request;
