//! Runner support: configuration loading, the stdin transition gate and
//! report rendering. `main.rs` only wires these together.

pub mod config;
pub mod gate;
pub mod render;

pub use config::{apply_env_overrides, load_config, ConfigFormat};
pub use gate::StdinGate;
pub use render::{render_json, render_text};
