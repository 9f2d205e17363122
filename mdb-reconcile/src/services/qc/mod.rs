//! Quality control: statistics helpers and the analyzer

pub mod analyzer;
pub mod statistics;

pub use analyzer::QualityControlAnalyzer;
