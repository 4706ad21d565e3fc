//! HTTP handlers

pub mod health;
pub mod predictions;
pub mod model;
pub mod calibration;

#[cfg(test)]
mod tests;
