//! The `utils` module holds the pieces shared by every other module:
//! the error taxonomy and the logging capability.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
