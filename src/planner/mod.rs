//! C2: Token & Model Planner.
//!
//! Three cooperating, independently testable pieces: [`token_allocator`] sizes
//! the output token budget for a batch, [`model_selector`] scores the model
//! catalog to pick the best model for the current conditions, and
//! [`batch_sizer`] chooses how many jobs to send per request. All three are
//! advisory — the tier analyzer is free to override them (e.g. to size a
//! single-job request).

pub mod batch_sizer;
pub mod model_selector;
pub mod token_allocator;

pub use batch_sizer::{optimal_batch_size, BatchSizing, BindingConstraint, QualityPriority};
pub use model_selector::{ModelSelector, SelectionContext, SelectionRecord};
pub use token_allocator::{allocate, TokenAllocation, TokenRecommendation, MODEL_TOKEN_LIMIT};
