#![forbid(unsafe_code)]

pub mod listener;
pub mod registry;
pub mod session;

#[cfg(test)]
mod registry_tests;
