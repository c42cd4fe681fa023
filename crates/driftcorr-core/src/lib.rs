pub mod consts;
pub mod error;
pub mod fft;
pub mod filters;
pub mod fit;
pub mod io;
pub mod layer;
pub mod model;
pub mod peaks;
pub mod phase;
pub mod pipeline;
pub mod warp;
