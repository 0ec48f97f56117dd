//! Arrival classifier
//!
//! A residual convolutional network over per-window spectrograms, evaluated
//! natively from a JSON weight artifact:
//! - Network layers and the residual architecture
//! - Weight artifact loading and validation
//! - Batched inference with progress and cancellation

pub mod inference;
pub mod layers;
pub mod resnet;
pub mod weights;
