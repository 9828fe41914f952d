pub mod bridge;
pub mod engine;
pub mod sensitivity;

pub use bridge::bridge_growth_path;
pub use engine::DcfEngine;
pub use sensitivity::build_surface;
