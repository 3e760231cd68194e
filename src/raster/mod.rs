//! Fragment generation and render targets.

pub mod pass;
pub mod primitive;
pub mod shader;
pub mod state;
pub mod target;
