//! Types library for the marketplace analytics core
//!
//! This library provides all core type definitions shared by the dataset
//! mirror and the valuation engine, ensuring type safety and deterministic
//! behavior across services.
//!
//! # Modules
//! - `dataset`: Dataset naming
//! - `record`: Schema-less catalog records and field values
//! - `feature`: Feature vectors and the validated feature configuration
//! - `valuation`: Pricing strategies, anchors, and valuation outputs
//! - `refresh`: Refresh job status read model
//! - `errors`: Error taxonomy

// Public modules
pub mod dataset;
pub mod errors;
pub mod feature;
pub mod record;
pub mod refresh;
pub mod valuation;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dataset::*;
    pub use crate::errors::*;
    pub use crate::feature::*;
    pub use crate::record::*;
    pub use crate::refresh::*;
    pub use crate::valuation::*;
}
